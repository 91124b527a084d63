//! UDP host for the TURN relay
//!
//! Binds the listening interfaces and one socket per relay address, feeds
//! datagrams to the protocol core and sends back whatever it returns.
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


pub mod error;
pub mod relay_server;

pub use error::{RelayError, RelayResult};
pub use relay_server::RelayServer;
