//! Relayed data: Send indications and ChannelData from clients, and packets
//! arriving on relay addresses from peers
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


use super::{Processor, Response, StunClass};
use crate::allocation::FiveTuple;
use bytes::Bytes;
use rand::Rng;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, trace};
use turn_codec::{Attribute, ChannelData, Class, Method, StunMessage};

impl Processor {
    /// Indications never get a reply; anything not relayable is dropped.
    pub(super) fn indication(&self, message: StunMessage, addr: SocketAddr, now: Instant) -> Option<Response> {
        if message.method != Method::Send {
            trace!(client = %addr, method = ?message.method, "Dropping indication");
            return None;
        }

        let peer = *message.peer_addresses().first()?;
        let data = message.data()?.clone();
        let five_tuple = FiveTuple::udp(addr, self.interface);

        match self.service.table.permit_send(&five_tuple, &peer, now) {
            Some(relay) => Some(Self::to_peer(data, relay, peer)),
            None => {
                debug!(client = %addr, peer = %peer, "Send without permission dropped");
                None
            }
        }
    }

    pub(super) fn channel_data(&self, frame: ChannelData, addr: SocketAddr, now: Instant) -> Option<Response> {
        let five_tuple = FiveTuple::udp(addr, self.interface);
        match self.service.table.channel_peer(&five_tuple, frame.number, now) {
            Some((relay, peer)) => Some(Self::to_peer(frame.data, relay, peer)),
            None => {
                debug!(client = %addr, channel = frame.number, "ChannelData on unbound channel dropped");
                None
            }
        }
    }

    fn to_peer(data: Bytes, relay: SocketAddr, peer: SocketAddr) -> Response {
        Response {
            data,
            kind: StunClass::Raw,
            relay: Some(relay),
            interface: None,
            target: Some(peer),
        }
    }

    /// Route a packet that arrived on `relay` from `peer` to the owning
    /// client: ChannelData if the peer has a channel, a Data indication if it
    /// only has a permission, nothing otherwise.
    pub fn relay_inbound(&self, relay: SocketAddr, peer: SocketAddr, payload: &[u8]) -> Option<Response> {
        let route = self.service.table.inbound_route(&relay, &peer, Instant::now())?;

        let (data, kind) = match route.channel {
            Some(number) => {
                let frame = ChannelData::new(number, Bytes::copy_from_slice(payload));
                (frame.encode().ok()?, StunClass::Channel)
            }
            None => {
                let transaction_id: [u8; 12] = rand::thread_rng().gen();
                let indication = StunMessage::new(Method::Data, Class::Indication, transaction_id)
                    .with(Attribute::XorPeerAddress(peer))
                    .with(Attribute::Data(Bytes::copy_from_slice(payload)));
                (indication.encode(None, false).ok()?, StunClass::Message)
            }
        };

        Some(Response {
            data,
            kind,
            relay: Some(relay),
            interface: Some(route.five_tuple.server),
            target: Some(route.five_tuple.client),
        })
    }
}
