//! Server-issued nonces, one per client transport address
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


use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const NONCE_LEN: usize = 16;

/// Default bound on tracked client addresses
pub const DEFAULT_NONCE_CAPACITY: usize = 65536;

#[derive(Debug, Clone)]
struct IssuedNonce {
    value: String,
    expires_at: Instant,
}

/// Nonces valid for a fixed window after issue.
///
/// At most `capacity` client addresses are tracked (a soft bound under
/// concurrent issue). A full table drops expired nonces first, then an
/// arbitrary one; that client gets 438 on its next request.
pub struct NonceTable {
    nonces: DashMap<SocketAddr, IssuedNonce>,
    ttl: Duration,
    capacity: usize,
}

impl NonceTable {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_NONCE_CAPACITY)
    }

    /// `capacity` 0 means unbounded
    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            nonces: DashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Current nonce of the client, issuing a new one if it has none or it
    /// expired.
    pub fn get_or_issue(&self, addr: SocketAddr, now: Instant) -> String {
        self.make_room(&addr, now);
        let mut entry = self.nonces.entry(addr).or_insert_with(|| self.generate(now));
        if entry.expires_at <= now {
            *entry = self.generate(now);
        }
        entry.value.clone()
    }

    /// Replace the client's nonce unconditionally.
    pub fn issue(&self, addr: SocketAddr, now: Instant) -> String {
        self.make_room(&addr, now);
        let nonce = self.generate(now);
        let value = nonce.value.clone();
        self.nonces.insert(addr, nonce);
        value
    }

    /// Whether `nonce` is the client's current, unexpired nonce
    pub fn verify(&self, addr: &SocketAddr, nonce: &str, now: Instant) -> bool {
        self.nonces
            .get(addr)
            .map(|issued| issued.value == nonce && issued.expires_at > now)
            .unwrap_or(false)
    }

    /// Drop expired nonces; returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.nonces.len();
        self.nonces.retain(|_, issued| issued.expires_at > now);
        before.saturating_sub(self.nonces.len())
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    // must run before any entry guard on `nonces` is taken
    fn make_room(&self, addr: &SocketAddr, now: Instant) {
        if self.capacity == 0 || self.nonces.len() < self.capacity || self.nonces.contains_key(addr) {
            return;
        }

        self.nonces.retain(|_, issued| issued.expires_at > now);
        if self.nonces.len() >= self.capacity {
            let victim = self.nonces.iter().next().map(|entry| *entry.key());
            if let Some(victim) = victim {
                self.nonces.remove(&victim);
            }
        }
    }

    fn generate(&self, now: Instant) -> IssuedNonce {
        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();

        IssuedNonce {
            value,
            expires_at: now + self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.0.2.1:5000".parse().unwrap()
    }

    fn client(port: u16) -> SocketAddr {
        SocketAddr::new("192.0.2.1".parse().unwrap(), port)
    }

    #[test]
    fn test_capacity_bounds_table() {
        let table = NonceTable::with_capacity(Duration::from_secs(60), 2);
        let now = Instant::now();
        for port in 1000..1010 {
            table.get_or_issue(client(port), now);
        }
        assert_eq!(table.len(), 2);

        // the newest client always has a usable nonce
        let nonce = table.get_or_issue(client(2000), now);
        assert!(table.verify(&client(2000), &nonce, now));
    }

    #[test]
    fn test_full_table_drops_expired_first() {
        let table = NonceTable::with_capacity(Duration::from_secs(60), 2);
        let now = Instant::now();
        table.get_or_issue(client(1000), now);
        let kept = table.get_or_issue(client(1001), now + Duration::from_secs(30));

        let later = now + Duration::from_secs(61);
        table.issue(client(1002), later);
        assert_eq!(table.len(), 2);
        assert!(table.verify(&client(1001), &kept, later));
    }

    #[test]
    fn test_nonce_shape() {
        let table = NonceTable::new(Duration::from_secs(60));
        let nonce = table.get_or_issue(addr(), Instant::now());
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_nonce_stable_within_window() {
        let table = NonceTable::new(Duration::from_secs(60));
        let now = Instant::now();
        let first = table.get_or_issue(addr(), now);
        let second = table.get_or_issue(addr(), now + Duration::from_secs(30));
        assert_eq!(first, second);
        assert!(table.verify(&addr(), &first, now + Duration::from_secs(59)));
    }

    #[test]
    fn test_nonce_expires() {
        let table = NonceTable::new(Duration::from_secs(60));
        let now = Instant::now();
        let first = table.get_or_issue(addr(), now);
        let later = now + Duration::from_secs(61);

        assert!(!table.verify(&addr(), &first, later));
        let second = table.get_or_issue(addr(), later);
        assert_ne!(first, second);
        assert!(table.verify(&addr(), &second, later));
    }

    #[test]
    fn test_unknown_client_and_sweep() {
        let table = NonceTable::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(!table.verify(&addr(), "anything", now));

        table.issue(addr(), now);
        assert_eq!(table.sweep(now + Duration::from_secs(10)), 0);
        assert_eq!(table.sweep(now + Duration::from_secs(61)), 1);
        assert!(table.is_empty());
    }
}
