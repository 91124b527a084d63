//! Service façade
//!
//! A [`Service`] owns the state shared by every interface: allocation table,
//! nonces, authentication gateway and event notifier. Processors handed out
//! by [`Service::processor`] all operate on that state.
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


use crate::allocation::{AllocationOptions, AllocationTable, RelayPool};
use crate::auth::{AuthGateway, PasswordLookup};
use crate::dispatcher::Processor;
use crate::events::{EventNotifier, TurnEvent};
use crate::nonce::{NonceTable, DEFAULT_NONCE_CAPACITY};
use std::net::IpAddr;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub realm: String,
    /// SOFTWARE attribute value
    pub software: String,
    pub allocation: AllocationOptions,
    /// Relay IP addresses (the interfaces' external addresses)
    pub relay_addresses: Vec<IpAddr>,
    pub port_range: RangeInclusive<u16>,
    pub nonce_ttl: Duration,
    /// Client addresses with a tracked nonce, 0 = unbounded
    pub nonce_capacity: usize,
    /// Bound on a single password lookup
    pub auth_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            realm: "localhost".to_string(),
            software: "turn-relay".to_string(),
            allocation: AllocationOptions::default(),
            relay_addresses: Vec::new(),
            port_range: 49152..=65535,
            nonce_ttl: Duration::from_secs(3600),
            nonce_capacity: DEFAULT_NONCE_CAPACITY,
            auth_timeout: Duration::from_secs(5),
        }
    }
}

pub(crate) struct ServiceInner {
    pub realm: String,
    pub software: String,
    pub table: AllocationTable,
    pub nonces: NonceTable,
    pub auth: AuthGateway,
    pub events: EventNotifier,
}

/// Shared TURN state
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub fn new(options: ServiceOptions, lookup: Arc<dyn PasswordLookup>, events: EventNotifier) -> Self {
        let pool = RelayPool::new(options.relay_addresses, options.port_range);
        let table = AllocationTable::new(options.allocation, pool);
        let auth = AuthGateway::new(lookup, options.auth_timeout, events.clone());

        info!(
            realm = %options.realm,
            relay_capacity = table.capacity(),
            "TURN service created"
        );

        Self {
            inner: Arc::new(ServiceInner {
                realm: options.realm,
                software: options.software,
                table,
                nonces: NonceTable::with_capacity(options.nonce_ttl, options.nonce_capacity),
                auth,
                events,
            }),
        }
    }

    /// Processor for one listening interface and the address clients see it as
    pub fn processor(&self, interface: SocketAddr, external: SocketAddr) -> Processor {
        Processor::new(self.inner.clone(), interface, external)
    }

    pub fn table(&self) -> &AllocationTable {
        &self.inner.table
    }

    pub fn realm(&self) -> &str {
        &self.inner.realm
    }

    /// Expire allocations and nonces as of now; returns removed allocations.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let removed = self.inner.table.sweep_expired(now);
        for allocation in &removed {
            self.inner.events.notify(TurnEvent::Abort {
                addr: allocation.five_tuple.client,
                username: allocation.username.clone(),
                relay: allocation.relay,
            });
        }

        let nonces = self.inner.nonces.sweep(now);
        if !removed.is_empty() || nonces > 0 {
            debug!(allocations = removed.len(), nonces, "Sweep complete");
        }
        removed.len()
    }

    /// Delete every allocation of the user; returns how many were removed.
    pub fn remove_user(&self, username: &str) -> usize {
        let removed = self.inner.table.remove_user(username);
        for allocation in &removed {
            self.inner.events.notify(TurnEvent::Abort {
                addr: allocation.five_tuple.client,
                username: allocation.username.clone(),
                relay: allocation.relay,
            });
        }
        removed.len()
    }

    /// Run [`Service::sweep`] every `period` on a background task.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                service.sweep();
            }
        })
    }
}
