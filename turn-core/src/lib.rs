//! TURN relay protocol core
//!
//! Authenticates STUN/TURN requests against long-term credentials and keeps
//! the allocation, permission and channel-binding state relaying depends on.
//! Sockets stay with the host: it feeds datagrams to a [`Processor`] and sends
//! whatever [`Response`] comes back.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


pub mod allocation;
pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod nonce;
pub mod service;

pub use allocation::{
    Allocation, AllocationOptions, AllocationTable, ChannelBinding, FiveTuple, InboundRoute, RelayPool,
};
pub use auth::{AuthGateway, ChannelLookup, PasswordLookup, PasswordRequest, StaticCredentials};
pub use dispatcher::{ErrorKind, Processor, Response, StunClass};
pub use error::{TableError, TableResult};
pub use events::{Event, EventNotifier, TurnEvent};
pub use nonce::{NonceTable, DEFAULT_NONCE_CAPACITY};
pub use service::{Service, ServiceOptions};
