//! Allocate and Refresh
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


use super::auth::Authenticated;
use super::{ErrorKind, Processor, Response};
use crate::allocation::{Allocation, FiveTuple};
use crate::error::TableError;
use crate::events::TurnEvent;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info};
use turn_codec::{Attribute, IpFamily, StunMessage, StunResult, Transport};

impl Processor {
    pub(super) fn allocate(
        &self,
        message: &StunMessage,
        addr: SocketAddr,
        auth: &Authenticated,
        now: Instant,
    ) -> StunResult<Response> {
        let five_tuple = FiveTuple::udp(addr, self.interface);
        let table = &self.service.table;

        if let Some(existing) = table.find(&five_tuple, now) {
            // retransmission of the request that created it
            if existing.transaction_id == message.transaction_id && existing.username == auth.username {
                debug!(client = %addr, "Allocate retransmission");
                return self.allocate_success(message, addr, auth, &existing, now);
            }
            return self.reject(message, ErrorKind::AllocationMismatch, Vec::new());
        }

        match message.requested_transport() {
            None => return self.reject(message, ErrorKind::BadRequest, Vec::new()),
            Some(Transport::Udp) => {}
            Some(transport) => {
                debug!(client = %addr, protocol = transport.protocol(), "Unsupported transport");
                return self.reject(message, ErrorKind::UnsupportedTransportProtocol, Vec::new());
            }
        }

        let family = match message.requested_family() {
            Some(family) if !table.has_family(family) => {
                return self.reject(message, ErrorKind::AddressFamilyNotSupported, Vec::new());
            }
            Some(family) => family,
            None => IpFamily::of(&self.external.ip()),
        };

        let allocation = match table.create(
            five_tuple,
            &auth.username,
            message.transaction_id,
            family,
            message.lifetime(),
            now,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                let kind = match &e {
                    TableError::Exists(_) | TableError::Capacity | TableError::Quota(_) => {
                        ErrorKind::from(&e)
                    }
                    _ => ErrorKind::ServerError,
                };
                info!(client = %addr, username = %auth.username, error = %e, "Allocate refused");
                return self.reject(message, kind, Vec::new());
            }
        };

        self.service.events.notify(TurnEvent::Allocated {
            addr,
            username: auth.username.clone(),
            port: allocation.relay.port(),
            relay: allocation.relay,
        });
        self.allocate_success(message, addr, auth, &allocation, now)
    }

    fn allocate_success(
        &self,
        message: &StunMessage,
        addr: SocketAddr,
        auth: &Authenticated,
        allocation: &Allocation,
        now: Instant,
    ) -> StunResult<Response> {
        let lifetime = allocation.remaining(now).as_secs() as u32;
        let mut response = self.success(
            message,
            vec![
                Attribute::XorRelayedAddress(allocation.relay),
                Attribute::XorMappedAddress(addr),
                Attribute::Lifetime(lifetime),
            ],
            &auth.key,
        )?;
        response.relay = Some(allocation.relay);
        Ok(response)
    }

    pub(super) fn refresh(
        &self,
        message: &StunMessage,
        addr: SocketAddr,
        auth: &Authenticated,
        now: Instant,
    ) -> StunResult<Response> {
        let five_tuple = FiveTuple::udp(addr, self.interface);
        let table = &self.service.table;
        let desired = table.options().desired_lifetime(message.lifetime());

        let allocation = match table.find(&five_tuple, now) {
            Some(allocation) => allocation,
            // already gone: deleting it again succeeds
            None if desired.is_zero() => {
                return self.success(message, vec![Attribute::Lifetime(0)], &auth.key);
            }
            None => return self.reject(message, ErrorKind::AllocationMismatch, Vec::new()),
        };

        if allocation.username != auth.username {
            return self.reject(message, ErrorKind::WrongCredentials, Vec::new());
        }

        if let Some(family) = message.requested_family() {
            if family != IpFamily::of(&allocation.relay.ip()) {
                return self.reject(message, ErrorKind::PeerAddressFamilyMismatch, Vec::new());
            }
        }

        if desired.is_zero() {
            if let Some(deleted) = table.delete(&five_tuple) {
                self.service.events.notify(TurnEvent::Abort {
                    addr,
                    username: deleted.username,
                    relay: deleted.relay,
                });
            }
            return self.success(message, vec![Attribute::Lifetime(0)], &auth.key);
        }

        match table.refresh(&five_tuple, desired, now) {
            Ok(lifetime) => {
                let seconds = lifetime.as_secs() as u32;
                self.service.events.notify(TurnEvent::Refresh {
                    addr,
                    username: auth.username.clone(),
                    lifetime: seconds,
                });
                self.success(message, vec![Attribute::Lifetime(seconds)], &auth.key)
            }
            Err(e) => self.reject(message, ErrorKind::from(&e), Vec::new()),
        }
    }
}
