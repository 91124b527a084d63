//! STUN/TURN wire codec
//!
//! Parses and serializes STUN messages (RFC 8489) and TURN ChannelData
//! frames (RFC 8656), and validates long-term credentials carried in
//! MESSAGE-INTEGRITY / MESSAGE-INTEGRITY-SHA256.
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


pub mod address;
pub mod attribute;
pub mod channel;
pub mod credential;
pub mod error;
pub mod integrity;
pub mod message;
pub mod method;

pub use address::{unxor_address, xor_address, IpFamily, MAGIC_COOKIE};
pub use attribute::{kind, Attribute, ErrorCode, Transport};
pub use channel::{ChannelData, CHANNEL_RANGE};
pub use credential::{check_integrity, validate, Credential};
pub use error::{StunError, StunResult};
pub use integrity::{long_term_key, IntegrityKey, IntegrityKind};
pub use message::{decode, peek_class, Payload, StunMessage};
pub use method::{Class, Method};
