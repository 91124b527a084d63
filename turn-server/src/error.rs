//! Error types for the relay server
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


use thiserror::Error;

/// Relay server error
#[derive(Debug, Error)]
pub enum RelayError {
    /// Socket setup failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Unusable interface configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A server task stopped unexpectedly
    #[error("Server error: {0}")]
    ServerError(String),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
