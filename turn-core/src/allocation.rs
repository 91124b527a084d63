//! TURN allocation management
//!
//! Allocations are keyed by five-tuple in a sharded map so that lookups,
//! refreshes and the expiry sweep are serialized per allocation without a
//! global lock. Permissions and channel bindings live inside their allocation
//! and share its lock.
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


use crate::error::{TableError, TableResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use turn_codec::{IpFamily, Transport};
use uuid::Uuid;

/// A channel number or peer cannot move to another binding until this long
/// after the previous binding expired.
pub const CHANNEL_REUSE_GUARD: Duration = Duration::from_secs(300);

/// Client transport address, server transport address and protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub client: SocketAddr,
    pub server: SocketAddr,
    pub transport: Transport,
}

impl FiveTuple {
    pub fn udp(client: SocketAddr, server: SocketAddr) -> Self {
        Self {
            client,
            server,
            transport: Transport::Udp,
        }
    }
}

/// Channel number bound to a peer transport address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub number: u16,
    pub peer: SocketAddr,
    pub expires_at: Instant,
}

/// Allocation information
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Allocation ID
    pub id: Uuid,
    pub five_tuple: FiveTuple,
    /// Username that created the allocation
    pub username: String,
    /// Relay transport address leased from the pool
    pub relay: SocketAddr,
    /// Transaction ID of the Allocate request that created it
    pub transaction_id: [u8; 12],
    pub lifetime: Duration,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// Peer IP -> permission expiry
    pub permissions: HashMap<IpAddr, Instant>,
    /// Channel number -> binding
    pub channels: HashMap<u16, ChannelBinding>,
}

impl Allocation {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Check if the peer IP holds an unexpired permission
    pub fn is_permitted(&self, peer: &IpAddr, now: Instant) -> bool {
        self.permissions
            .get(peer)
            .map(|expires_at| *expires_at > now)
            .unwrap_or(false)
    }

    /// Active channel bound to the peer transport address
    pub fn channel_for_peer(&self, peer: &SocketAddr, now: Instant) -> Option<u16> {
        self.channels
            .values()
            .find(|binding| binding.peer == *peer && binding.expires_at > now)
            .map(|binding| binding.number)
    }

    fn family(&self) -> IpFamily {
        IpFamily::of(&self.relay.ip())
    }

    fn permit(&mut self, peer: IpAddr, until: Instant) {
        let expires_at = self.permissions.entry(peer).or_insert(until);
        if *expires_at < until {
            *expires_at = until;
        }
    }

    fn prune(&mut self, now: Instant) {
        self.permissions.retain(|_, expires_at| *expires_at > now);
        self.channels
            .retain(|_, binding| binding.expires_at + CHANNEL_REUSE_GUARD > now);
    }
}

/// Lifetimes and limits applied by the table
#[derive(Debug, Clone)]
pub struct AllocationOptions {
    pub default_lifetime: Duration,
    pub max_lifetime: Duration,
    pub permission_lifetime: Duration,
    pub channel_lifetime: Duration,
    /// Maximum live allocations, 0 = unlimited
    pub max_allocations: usize,
    /// Maximum live allocations per username, 0 = unlimited
    pub user_quota: usize,
}

impl Default for AllocationOptions {
    fn default() -> Self {
        Self {
            default_lifetime: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
            permission_lifetime: Duration::from_secs(300),
            channel_lifetime: Duration::from_secs(600),
            max_allocations: 0,
            user_quota: 0,
        }
    }
}

impl AllocationOptions {
    /// Lifetime granted for a requested LIFETIME value.
    ///
    /// Absent -> default. Zero -> zero. Otherwise the request capped at the
    /// maximum and floored at the default.
    pub fn desired_lifetime(&self, requested: Option<u32>) -> Duration {
        match requested {
            None => self.default_lifetime,
            Some(0) => Duration::ZERO,
            Some(seconds) => Duration::from_secs(seconds as u64)
                .min(self.max_lifetime)
                .max(self.default_lifetime),
        }
    }
}

/// Exclusive lease of relay transport addresses
pub struct RelayPool {
    addresses: Vec<IpAddr>,
    ports: RangeInclusive<u16>,
    in_use: Mutex<HashSet<SocketAddr>>,
}

impl RelayPool {
    pub fn new(addresses: Vec<IpAddr>, ports: RangeInclusive<u16>) -> Self {
        let mut unique = Vec::new();
        for addr in addresses {
            if !unique.contains(&addr) {
                unique.push(addr);
            }
        }

        Self {
            addresses: unique,
            ports,
            in_use: Mutex::new(HashSet::new()),
        }
    }

    pub fn has_family(&self, family: IpFamily) -> bool {
        self.addresses.iter().any(|ip| IpFamily::of(ip) == family)
    }

    /// Total number of relay addresses
    pub fn capacity(&self) -> usize {
        let ports = if self.ports.is_empty() {
            0
        } else {
            (*self.ports.end() - *self.ports.start()) as usize + 1
        };
        self.addresses.len() * ports
    }

    /// Lease a free address of the family, starting from a random port.
    pub fn lease(&self, family: IpFamily) -> Option<SocketAddr> {
        if self.ports.is_empty() {
            return None;
        }

        let start = *self.ports.start();
        let span = (*self.ports.end() - start) as u32 + 1;
        let offset = rand::thread_rng().gen_range(0..span);

        let mut in_use = self.in_use.lock();
        for ip in self.addresses.iter().filter(|ip| IpFamily::of(ip) == family) {
            for step in 0..span {
                let port = start + ((offset + step) % span) as u16;
                let candidate = SocketAddr::new(*ip, port);
                if in_use.insert(candidate) {
                    return Some(candidate);
                }
            }
        }

        None
    }

    pub fn release(&self, addr: &SocketAddr) {
        self.in_use.lock().remove(addr);
    }

    pub fn leased(&self) -> usize {
        self.in_use.lock().len()
    }
}

/// Where a packet arriving on a relay address goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRoute {
    pub five_tuple: FiveTuple,
    /// Channel bound to the peer, if any
    pub channel: Option<u16>,
}

/// Allocation table shared by every processor
pub struct AllocationTable {
    allocations: DashMap<FiveTuple, Allocation>,
    relays: DashMap<SocketAddr, FiveTuple>,
    /// Entries in `allocations`, reserved before a vacant slot is filled
    entries: AtomicUsize,
    pool: RelayPool,
    options: AllocationOptions,
}

impl AllocationTable {
    pub fn new(options: AllocationOptions, pool: RelayPool) -> Self {
        Self {
            allocations: DashMap::new(),
            relays: DashMap::new(),
            entries: AtomicUsize::new(0),
            pool,
            options,
        }
    }

    pub fn options(&self) -> &AllocationOptions {
        &self.options
    }

    pub fn has_family(&self, family: IpFamily) -> bool {
        self.pool.has_family(family)
    }

    /// Create an allocation for the five-tuple.
    ///
    /// A zero or absent requested lifetime gets the default. An expired
    /// allocation still in the table is replaced.
    pub fn create(
        &self,
        five_tuple: FiveTuple,
        username: &str,
        transaction_id: [u8; 12],
        family: IpFamily,
        requested_lifetime: Option<u32>,
        now: Instant,
    ) -> TableResult<Allocation> {
        // counted before taking the entry lock
        if self.options.user_quota > 0 && self.user_count(username, now) >= self.options.user_quota {
            return Err(TableError::Quota(username.to_string()));
        }

        let lifetime = match self.options.desired_lifetime(requested_lifetime) {
            lifetime if lifetime.is_zero() => self.options.default_lifetime,
            lifetime => lifetime,
        };

        match self.allocations.entry(five_tuple) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_expired(now) {
                    return Err(TableError::Exists(five_tuple.client));
                }

                let relay = self.pool.lease(family).ok_or(TableError::Capacity)?;
                let stale = entry.insert(Self::build(five_tuple, username, relay, transaction_id, lifetime, now));
                self.relays.remove(&stale.relay);
                self.pool.release(&stale.relay);
                self.relays.insert(relay, five_tuple);
                debug!(client = %five_tuple.client, relay = %stale.relay, "Replaced expired allocation");
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                self.reserve()?;
                let relay = match self.pool.lease(family) {
                    Some(relay) => relay,
                    None => {
                        self.entries.fetch_sub(1, Ordering::AcqRel);
                        return Err(TableError::Capacity);
                    }
                };
                let allocation = Self::build(five_tuple, username, relay, transaction_id, lifetime, now);
                self.relays.insert(relay, five_tuple);
                info!(
                    client = %five_tuple.client,
                    username = %username,
                    relay = %relay,
                    lifetime = lifetime.as_secs(),
                    "Allocation created"
                );
                Ok(entry.insert(allocation).value().clone())
            }
        }
    }

    /// Claim a slot under `max_allocations`
    fn reserve(&self) -> TableResult<()> {
        let max = self.options.max_allocations;
        self.entries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (max == 0 || count < max).then_some(count + 1)
            })
            .map(|_| ())
            .map_err(|_| TableError::Capacity)
    }

    fn build(
        five_tuple: FiveTuple,
        username: &str,
        relay: SocketAddr,
        transaction_id: [u8; 12],
        lifetime: Duration,
        now: Instant,
    ) -> Allocation {
        Allocation {
            id: Uuid::new_v4(),
            five_tuple,
            username: username.to_string(),
            relay,
            transaction_id,
            lifetime,
            created_at: now,
            expires_at: now + lifetime,
            permissions: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    /// Live allocation for the five-tuple
    pub fn find(&self, five_tuple: &FiveTuple, now: Instant) -> Option<Allocation> {
        self.allocations
            .get(five_tuple)
            .filter(|allocation| !allocation.is_expired(now))
            .map(|allocation| allocation.value().clone())
    }

    /// Extend a live allocation to expire `lifetime` from now.
    pub fn refresh(&self, five_tuple: &FiveTuple, lifetime: Duration, now: Instant) -> TableResult<Duration> {
        let mut allocation = self
            .allocations
            .get_mut(five_tuple)
            .filter(|allocation| !allocation.is_expired(now))
            .ok_or(TableError::NotFound(five_tuple.client))?;

        allocation.lifetime = lifetime;
        allocation.expires_at = now + lifetime;
        Ok(lifetime)
    }

    /// Remove the allocation and release its relay address.
    pub fn delete(&self, five_tuple: &FiveTuple) -> Option<Allocation> {
        let (_, allocation) = self.allocations.remove(five_tuple)?;
        self.entries.fetch_sub(1, Ordering::AcqRel);
        self.relays.remove(&allocation.relay);
        self.pool.release(&allocation.relay);
        info!(client = %five_tuple.client, relay = %allocation.relay, "Allocation deleted");
        Some(allocation)
    }

    /// Remove every expired allocation and prune expired permissions and
    /// channel bindings of the rest. Returns the removed allocations.
    pub fn sweep_expired(&self, now: Instant) -> Vec<Allocation> {
        let mut removed = Vec::new();
        self.allocations.retain(|_, allocation| {
            if allocation.is_expired(now) {
                removed.push(allocation.clone());
                false
            } else {
                allocation.prune(now);
                true
            }
        });

        self.entries.fetch_sub(removed.len(), Ordering::AcqRel);
        for allocation in &removed {
            self.relays
                .remove_if(&allocation.relay, |_, owner| *owner == allocation.five_tuple);
            self.pool.release(&allocation.relay);
            debug!(client = %allocation.five_tuple.client, relay = %allocation.relay, "Allocation expired");
        }

        removed
    }

    /// Install or refresh a permission for the peer IP.
    ///
    /// Returns true when the permission did not exist before.
    pub fn create_permission(&self, five_tuple: &FiveTuple, peer: IpAddr, now: Instant) -> TableResult<bool> {
        let mut allocation = self.live_mut(five_tuple, now)?;
        if IpFamily::of(&peer) != allocation.family() {
            return Err(TableError::FamilyMismatch(SocketAddr::new(peer, 0)));
        }

        let fresh = !allocation.is_permitted(&peer, now);
        let until = now + self.options.permission_lifetime;
        allocation.permit(peer, until);
        Ok(fresh)
    }

    /// Bind a channel number to a peer, or refresh the existing binding.
    ///
    /// Also installs a permission for the peer IP. Returns true when the
    /// binding is new.
    pub fn bind_channel(&self, five_tuple: &FiveTuple, number: u16, peer: SocketAddr, now: Instant) -> TableResult<bool> {
        let mut allocation = self.live_mut(five_tuple, now)?;
        if IpFamily::of(&peer.ip()) != allocation.family() {
            return Err(TableError::FamilyMismatch(peer));
        }

        let mut fresh = true;
        if let Some(existing) = allocation.channels.get(&number) {
            if existing.peer == peer {
                fresh = existing.expires_at <= now;
            } else if existing.expires_at + CHANNEL_REUSE_GUARD > now {
                return Err(TableError::ChannelConflict(number));
            }
        }

        let conflicting_peer = allocation.channels.values().any(|binding| {
            binding.number != number
                && binding.peer == peer
                && binding.expires_at + CHANNEL_REUSE_GUARD > now
        });
        if conflicting_peer {
            return Err(TableError::ChannelConflict(number));
        }

        allocation
            .channels
            .retain(|other, binding| *other == number || binding.peer != peer);
        allocation.channels.insert(
            number,
            ChannelBinding {
                number,
                peer,
                expires_at: now + self.options.channel_lifetime,
            },
        );
        let until = now + self.options.permission_lifetime;
        allocation.permit(peer.ip(), until);
        Ok(fresh)
    }

    /// Outbound Send indication: relay address to send from if the peer is
    /// permitted. Refreshes the permission.
    pub fn permit_send(&self, five_tuple: &FiveTuple, peer: &SocketAddr, now: Instant) -> Option<SocketAddr> {
        let mut allocation = self.live_mut(five_tuple, now).ok()?;
        if !allocation.is_permitted(&peer.ip(), now) {
            return None;
        }

        let until = now + self.options.permission_lifetime;
        allocation.permit(peer.ip(), until);
        Some(allocation.relay)
    }

    /// Outbound ChannelData: relay address and peer of an active binding.
    /// Refreshes the binding and the peer's permission.
    pub fn channel_peer(&self, five_tuple: &FiveTuple, number: u16, now: Instant) -> Option<(SocketAddr, SocketAddr)> {
        let mut allocation = self.live_mut(five_tuple, now).ok()?;
        let channel_lifetime = self.options.channel_lifetime;
        let binding = allocation
            .channels
            .get_mut(&number)
            .filter(|binding| binding.expires_at > now)?;
        binding.expires_at = now + channel_lifetime;
        let peer = binding.peer;

        let until = now + self.options.permission_lifetime;
        allocation.permit(peer.ip(), until);
        Some((allocation.relay, peer))
    }

    /// Route a packet received on `relay` from `peer` back to its client.
    pub fn inbound_route(&self, relay: &SocketAddr, peer: &SocketAddr, now: Instant) -> Option<InboundRoute> {
        // copied out so the relay index guard is released first
        let five_tuple = *self.relays.get(relay)?;
        let allocation = self.allocations.get(&five_tuple)?;
        if allocation.is_expired(now) || allocation.relay != *relay {
            return None;
        }

        if let Some(channel) = allocation.channel_for_peer(peer, now) {
            return Some(InboundRoute {
                five_tuple,
                channel: Some(channel),
            });
        }

        allocation
            .is_permitted(&peer.ip(), now)
            .then_some(InboundRoute {
                five_tuple,
                channel: None,
            })
    }

    /// Delete every allocation of the username.
    pub fn remove_user(&self, username: &str) -> Vec<Allocation> {
        let owned: Vec<FiveTuple> = self
            .allocations
            .iter()
            .filter(|entry| entry.username == username)
            .map(|entry| *entry.key())
            .collect();

        owned.iter().filter_map(|five_tuple| self.delete(five_tuple)).collect()
    }

    /// Number of allocations in the table
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Whether `relay` belongs to an allocation in the table
    pub fn has_relay(&self, relay: &SocketAddr) -> bool {
        self.relays.contains_key(relay)
    }

    /// Relay addresses of every allocation in the table
    pub fn relays(&self) -> Vec<SocketAddr> {
        self.relays.iter().map(|entry| *entry.key()).collect()
    }

    /// Relay addresses the pool can hand out in total
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Username -> client addresses of its live allocations
    pub fn users(&self) -> HashMap<String, Vec<SocketAddr>> {
        let mut users: HashMap<String, Vec<SocketAddr>> = HashMap::new();
        for entry in self.allocations.iter() {
            users
                .entry(entry.username.clone())
                .or_default()
                .push(entry.five_tuple.client);
        }
        users
    }

    fn user_count(&self, username: &str, now: Instant) -> usize {
        self.allocations
            .iter()
            .filter(|entry| entry.username == username && !entry.is_expired(now))
            .count()
    }

    fn live_mut(
        &self,
        five_tuple: &FiveTuple,
        now: Instant,
    ) -> TableResult<dashmap::mapref::one::RefMut<'_, FiveTuple, Allocation>> {
        self.allocations
            .get_mut(five_tuple)
            .filter(|allocation| !allocation.is_expired(now))
            .ok_or(TableError::NotFound(five_tuple.client))
    }
}
