//! CreatePermission and ChannelBind
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
use crate::events::TurnEvent;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tracing::debug;
use turn_codec::{IpFamily, StunMessage, StunResult, CHANNEL_RANGE};

fn is_forbidden_peer(ip: &IpAddr) -> bool {
    ip.is_unspecified() || ip.is_multicast()
}

impl Processor {
    /// Live allocation of the five-tuple owned by the authenticated user, or
    /// the error response to send.
    fn owned_allocation(
        &self,
        message: &StunMessage,
        five_tuple: &FiveTuple,
        auth: &Authenticated,
        now: Instant,
    ) -> StunResult<Result<Allocation, Response>> {
        match self.service.table.find(five_tuple, now) {
            None => self.reject(message, ErrorKind::AllocationMismatch, Vec::new()).map(Err),
            Some(allocation) if allocation.username != auth.username => {
                self.reject(message, ErrorKind::WrongCredentials, Vec::new()).map(Err)
            }
            Some(allocation) => Ok(Ok(allocation)),
        }
    }

    pub(super) fn create_permission(
        &self,
        message: &StunMessage,
        addr: SocketAddr,
        auth: &Authenticated,
        now: Instant,
    ) -> StunResult<Response> {
        let peers = message.peer_addresses();
        if peers.is_empty() {
            return self.reject(message, ErrorKind::BadRequest, Vec::new());
        }

        let five_tuple = FiveTuple::udp(addr, self.interface);
        let allocation = match self.owned_allocation(message, &five_tuple, auth, now)? {
            Ok(allocation) => allocation,
            Err(response) => return Ok(response),
        };

        // every peer is checked before any permission is installed
        let relay_family = IpFamily::of(&allocation.relay.ip());
        for peer in &peers {
            if is_forbidden_peer(&peer.ip()) {
                return self.reject(message, ErrorKind::Forbidden, Vec::new());
            }
            if IpFamily::of(&peer.ip()) != relay_family {
                return self.reject(message, ErrorKind::PeerAddressFamilyMismatch, Vec::new());
            }
        }

        // refreshed permissions are not announced
        let mut seen: Vec<IpAddr> = Vec::new();
        let mut installed: Vec<SocketAddr> = Vec::new();
        for peer in peers {
            if seen.contains(&peer.ip()) {
                continue;
            }
            seen.push(peer.ip());
            match self.service.table.create_permission(&five_tuple, peer.ip(), now) {
                Ok(true) => installed.push(peer),
                Ok(false) => debug!(client = %addr, peer = %peer, "Permission refreshed"),
                Err(e) => return self.reject(message, ErrorKind::from(&e), Vec::new()),
            }
        }

        for peer in installed {
            debug!(client = %addr, peer = %peer, "Permission installed");
            self.service.events.notify(TurnEvent::CreatePermission {
                addr,
                username: auth.username.clone(),
                peer,
            });
        }

        self.success(message, Vec::new(), &auth.key)
    }

    pub(super) fn channel_bind(
        &self,
        message: &StunMessage,
        addr: SocketAddr,
        auth: &Authenticated,
        now: Instant,
    ) -> StunResult<Response> {
        let number = match message.channel_number() {
            Some(number) if CHANNEL_RANGE.contains(&number) => number,
            _ => return self.reject(message, ErrorKind::BadRequest, Vec::new()),
        };
        let peer = match message.peer_addresses().first() {
            Some(peer) => *peer,
            None => return self.reject(message, ErrorKind::BadRequest, Vec::new()),
        };

        let five_tuple = FiveTuple::udp(addr, self.interface);
        if let Err(response) = self.owned_allocation(message, &five_tuple, auth, now)? {
            return Ok(response);
        }

        if is_forbidden_peer(&peer.ip()) {
            return self.reject(message, ErrorKind::Forbidden, Vec::new());
        }

        match self.service.table.bind_channel(&five_tuple, number, peer, now) {
            Ok(fresh) => debug!(client = %addr, channel = number, peer = %peer, fresh, "Channel bound"),
            Err(e) => {
                debug!(client = %addr, channel = number, error = %e, "ChannelBind refused");
                return self.reject(message, ErrorKind::from(&e), Vec::new());
            }
        }

        self.service.events.notify(TurnEvent::ChannelBind {
            addr,
            username: auth.username.clone(),
            channel: number,
        });
        self.success(message, Vec::new(), &auth.key)
    }
}
