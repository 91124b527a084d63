//! Request dispatcher
//!
//! A [`Processor`] is bound to one listening interface and its external
//! address. It decodes each datagram, routes it by class and method,
//! authenticates where required, applies the outcome to the shared
//! allocation table and composes the bytes to send back.
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


mod allocation_requests;
mod auth;
mod data;
mod peer_requests;

use crate::error::TableError;
use crate::events::TurnEvent;
use crate::service::ServiceInner;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use turn_codec::{
    decode, Attribute, Class, ErrorCode, IntegrityKey, Method, Payload, StunMessage, StunResult,
};

/// What the bytes of a [`Response`] are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunClass {
    /// STUN message for a client
    Message,
    /// ChannelData frame for a client
    Channel,
    /// Relayed payload for a peer, sent from the relay address
    Raw,
}

/// Bytes to send, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Bytes,
    pub kind: StunClass,
    /// Relay transport address the data pertains to
    pub relay: Option<SocketAddr>,
    /// Listening interface the data leaves from
    pub interface: Option<SocketAddr>,
    /// Destination; `None` means back to the sender of the request
    pub target: Option<SocketAddr>,
}

impl Response {
    fn reply(data: Bytes, interface: SocketAddr) -> Self {
        Self {
            data,
            kind: StunClass::Message,
            relay: None,
            interface: Some(interface),
            target: None,
        }
    }
}

/// Error responses the dispatcher sends, with their STUN codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    UnknownAttribute,
    AllocationMismatch,
    StaleNonce,
    AddressFamilyNotSupported,
    WrongCredentials,
    UnsupportedTransportProtocol,
    PeerAddressFamilyMismatch,
    AllocationQuotaReached,
    ServerError,
    InsufficientCapacity,
}

impl ErrorKind {
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::UnknownAttribute => 420,
            ErrorKind::AllocationMismatch => 437,
            ErrorKind::StaleNonce => 438,
            ErrorKind::AddressFamilyNotSupported => 440,
            ErrorKind::WrongCredentials => 441,
            ErrorKind::UnsupportedTransportProtocol => 442,
            ErrorKind::PeerAddressFamilyMismatch => 443,
            ErrorKind::AllocationQuotaReached => 486,
            ErrorKind::ServerError => 500,
            ErrorKind::InsufficientCapacity => 508,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "Bad Request",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::UnknownAttribute => "Unknown Attribute",
            ErrorKind::AllocationMismatch => "Allocation Mismatch",
            ErrorKind::StaleNonce => "Stale Nonce",
            ErrorKind::AddressFamilyNotSupported => "Address Family not Supported",
            ErrorKind::WrongCredentials => "Wrong Credentials",
            ErrorKind::UnsupportedTransportProtocol => "Unsupported Transport Protocol",
            ErrorKind::PeerAddressFamilyMismatch => "Peer Address Family Mismatch",
            ErrorKind::AllocationQuotaReached => "Allocation Quota Reached",
            ErrorKind::ServerError => "Server Error",
            ErrorKind::InsufficientCapacity => "Insufficient Capacity",
        }
    }

    pub fn error_code(self) -> ErrorCode {
        ErrorCode::new(self.code(), self.reason())
    }
}

impl From<&TableError> for ErrorKind {
    fn from(error: &TableError) -> Self {
        match error {
            TableError::NotFound(_) | TableError::Exists(_) => ErrorKind::AllocationMismatch,
            TableError::Capacity => ErrorKind::InsufficientCapacity,
            TableError::Quota(_) => ErrorKind::AllocationQuotaReached,
            TableError::ChannelConflict(_) => ErrorKind::BadRequest,
            TableError::FamilyMismatch(_) => ErrorKind::PeerAddressFamilyMismatch,
        }
    }
}

/// Per-interface message processor
#[derive(Clone)]
pub struct Processor {
    pub(crate) service: Arc<ServiceInner>,
    interface: SocketAddr,
    external: SocketAddr,
}

impl Processor {
    pub(crate) fn new(service: Arc<ServiceInner>, interface: SocketAddr, external: SocketAddr) -> Self {
        Self {
            service,
            interface,
            external,
        }
    }

    /// Listening address this processor serves
    pub fn interface(&self) -> SocketAddr {
        self.interface
    }

    /// Address clients see this interface as
    pub fn external(&self) -> SocketAddr {
        self.external
    }

    /// Handle one datagram received from `addr`.
    ///
    /// `Ok(None)` means nothing is sent. Undecodable input and environmental
    /// faults are returned as errors for this message only.
    pub async fn process(&self, bytes: &[u8], addr: SocketAddr) -> StunResult<Option<Response>> {
        match decode(bytes)? {
            Payload::ChannelData(frame) => Ok(self.channel_data(frame, addr, Instant::now())),
            Payload::Message(message) => match message.class {
                Class::Request => self.request(message, addr).await.map(Some),
                Class::Indication => Ok(self.indication(message, addr, Instant::now())),
                Class::SuccessResponse | Class::ErrorResponse => {
                    debug!(client = %addr, method = ?message.method, "Ignoring response from client");
                    Ok(None)
                }
            },
        }
    }

    async fn request(&self, message: StunMessage, addr: SocketAddr) -> StunResult<Response> {
        let unknown = message.unknown_required();
        if !unknown.is_empty() {
            debug!(client = %addr, ?unknown, "Unknown comprehension-required attributes");
            return self.reject(
                &message,
                ErrorKind::UnknownAttribute,
                vec![Attribute::UnknownAttributes(unknown)],
            );
        }

        match message.method {
            Method::Binding => self.binding(&message, addr),
            Method::Send | Method::Data => self.reject(&message, ErrorKind::BadRequest, Vec::new()),
            method => {
                let auth = match self.authenticate(&message, addr).await? {
                    Ok(auth) => auth,
                    Err(response) => return Ok(response),
                };

                let now = Instant::now();
                match method {
                    Method::Allocate => self.allocate(&message, addr, &auth, now),
                    Method::Refresh => self.refresh(&message, addr, &auth, now),
                    Method::CreatePermission => self.create_permission(&message, addr, &auth, now),
                    _ => self.channel_bind(&message, addr, &auth, now),
                }
            }
        }
    }

    fn binding(&self, message: &StunMessage, addr: SocketAddr) -> StunResult<Response> {
        let response = message
            .reply(Class::SuccessResponse)
            .with(Attribute::XorMappedAddress(addr))
            .with(Attribute::MappedAddress(addr))
            .with(Attribute::ResponseOrigin(self.external))
            .with(Attribute::Software(self.service.software.clone()));

        self.service.events.notify(TurnEvent::Binding { addr });
        Ok(Response::reply(response.encode(None, true)?, self.interface))
    }

    /// Success response signed with the request's credential
    fn success(
        &self,
        message: &StunMessage,
        attributes: Vec<Attribute>,
        key: &IntegrityKey,
    ) -> StunResult<Response> {
        let mut response = message.reply(Class::SuccessResponse);
        response.attributes = attributes;
        response.push(Attribute::Software(self.service.software.clone()));
        Ok(Response::reply(response.encode(Some(key), true)?, self.interface))
    }

    /// Error response; carries FINGERPRINT but no integrity
    fn reject(
        &self,
        message: &StunMessage,
        kind: ErrorKind,
        attributes: Vec<Attribute>,
    ) -> StunResult<Response> {
        let mut response = message
            .reply(Class::ErrorResponse)
            .with(Attribute::ErrorCode(kind.error_code()));
        response.attributes.extend(attributes);
        response.push(Attribute::Software(self.service.software.clone()));

        debug!(method = ?message.method, code = kind.code(), "Rejecting request");
        Ok(Response::reply(response.encode(None, true)?, self.interface))
    }
}
