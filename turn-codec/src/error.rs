//! Error types for the STUN/TURN codec
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

/// Codec and validation error
///
/// These are the error kinds surfaced to the hosting layer. Every variant is
/// scoped to the single message being handled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StunError {
    /// Truncated, oversized or otherwise malformed input
    #[error("invalid input")]
    InvalidInput,

    /// Address family other than IPv4/IPv6
    #[error("unsupported ip family")]
    UnsupportedIpFamily,

    /// The hashing primitive refused its input
    #[error("hashing failed")]
    ShaFailed,

    /// MESSAGE-INTEGRITY(-SHA256) is required but absent
    #[error("message integrity missing")]
    NotIntegrity,

    /// MESSAGE-INTEGRITY(-SHA256) did not match
    #[error("message integrity check failed")]
    IntegrityFailed,

    /// Magic cookie is not 0x2112A442
    #[error("magic cookie mismatch")]
    NotCookie,

    /// Message type carries an unknown method
    #[error("unknown method")]
    UnknownMethod,

    /// Unrecoverable internal fault
    #[error("fatal error")]
    FatalError,

    /// Text attribute is not valid UTF-8
    #[error("utf8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

/// Result type for codec operations
pub type StunResult<T> = Result<T, StunError>;
