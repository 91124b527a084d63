//! Error types for the allocation table
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


use std::net::SocketAddr;
use thiserror::Error;

/// Allocation table outcome other than success
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    /// No allocation for the five-tuple
    #[error("Allocation not found: {0}")]
    NotFound(SocketAddr),

    /// The five-tuple already owns an allocation
    #[error("Allocation already exists: {0}")]
    Exists(SocketAddr),

    /// No relay address left for the family, or the table is full
    #[error("Insufficient capacity")]
    Capacity,

    /// The username reached its allocation quota
    #[error("Allocation quota reached: {0}")]
    Quota(String),

    /// Channel number or peer is bound elsewhere, or still in its reuse guard
    #[error("Channel conflict: {0:#06x}")]
    ChannelConflict(u16),

    /// Peer address family differs from the relay address family
    #[error("Peer address family mismatch: {0}")]
    FamilyMismatch(SocketAddr),
}

/// Result type for allocation table operations
pub type TableResult<T> = Result<T, TableError>;
