//! Relay server
//!
//! One task per listening interface reads datagrams. STUN requests may wait
//! on the password store, so each runs in its own task under a shared limit;
//! indications and ChannelData are handled inline. Relay sockets are bound
//! when an allocation is announced (or on first outbound use) and closed when
//! it goes away; each has a reader task passing peer traffic to
//! [`Processor::relay_inbound`]. Events can be dropped, so relay sockets are
//! also periodically reconciled against the allocation table.
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


use crate::error::{RelayError, RelayResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use turn_codec::{peek_class, Class};
use turn_config::InterfaceConfig;
use turn_core::{Event, Processor, Response, Service, StunClass, TurnEvent};

const RECV_BUFFER: usize = 65536;

/// Requests in flight across all interfaces
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 1024;

/// Period of the relay socket reconciliation
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

/// Interface sockets by local address
type InterfaceSockets = Arc<HashMap<SocketAddr, Arc<UdpSocket>>>;

struct Listener {
    socket: Arc<UdpSocket>,
    processor: Processor,
}

/// Socket bound to one relay address; its reader stops when this is dropped
struct RelaySocket {
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
}

impl Drop for RelaySocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[derive(Clone)]
struct Router {
    service: Service,
    interfaces: InterfaceSockets,
    /// External IP -> local IP relay sockets bind to, and the processor
    /// that owns the interface
    relay_binds: Arc<HashMap<IpAddr, (IpAddr, Processor)>>,
    relays: Arc<DashMap<SocketAddr, RelaySocket>>,
}

impl Router {
    async fn deliver(&self, response: Response, from: SocketAddr, listener: &UdpSocket) {
        let result = match (response.kind, response.relay, response.target) {
            (StunClass::Raw, Some(relay), Some(peer)) => match self.relay_socket(relay).await {
                Some(socket) => socket.send_to(&response.data, peer).await,
                None => return,
            },
            (_, _, target) => {
                let to = target.unwrap_or(from);
                match response.interface.and_then(|addr| self.interfaces.get(&addr)) {
                    Some(socket) => socket.send_to(&response.data, to).await,
                    None => listener.send_to(&response.data, to).await,
                }
            }
        };

        if let Err(e) = result {
            warn!(client = %from, error = %e, "Failed to send datagram");
        }
    }

    /// Socket for `relay`, binding it if needed
    async fn relay_socket(&self, relay: SocketAddr) -> Option<Arc<UdpSocket>> {
        if let Some(existing) = self.relays.get(&relay) {
            return Some(existing.socket.clone());
        }

        let (bind_ip, processor) = match self.relay_binds.get(&relay.ip()) {
            Some((bind_ip, processor)) => (*bind_ip, processor.clone()),
            None => {
                warn!(relay = %relay, "No interface for relay address");
                return None;
            }
        };

        let socket = match UdpSocket::bind(SocketAddr::new(bind_ip, relay.port())).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                // lost a race with a concurrent bind of the same relay
                if let Some(existing) = self.relays.get(&relay) {
                    return Some(existing.socket.clone());
                }
                error!(relay = %relay, error = %e, "Failed to bind relay socket");
                return None;
            }
        };

        match self.relays.entry(relay) {
            Entry::Occupied(entry) => Some(entry.get().socket.clone()),
            Entry::Vacant(entry) => {
                let reader = tokio::spawn(read_relay(
                    socket.clone(),
                    relay,
                    processor,
                    self.interfaces.clone(),
                ));
                entry.insert(RelaySocket {
                    socket: socket.clone(),
                    reader,
                });
                info!(relay = %relay, "Relay socket bound");
                Some(socket)
            }
        }
    }

    fn close_relay(&self, relay: &SocketAddr) {
        if self.relays.remove(relay).is_some() {
            info!(relay = %relay, "Relay socket closed");
        }
    }

    async fn apply(&self, event: &Event) {
        match &event.kind {
            TurnEvent::Allocated { relay, .. } => {
                self.relay_socket(*relay).await;
            }
            TurnEvent::Abort { relay, .. } => self.close_relay(relay),
            other => trace!(event = ?other, "TURN event"),
        }
    }

    /// Close relay sockets with no allocation behind them and bind the ones
    /// missing. Returns (closed, bound).
    async fn reconcile(&self) -> (usize, usize) {
        let table = self.service.table();

        // keys are collected before any removal from `relays`
        let stale: Vec<SocketAddr> = self
            .relays
            .iter()
            .map(|entry| *entry.key())
            .filter(|relay| !table.has_relay(relay))
            .collect();
        for relay in &stale {
            self.close_relay(relay);
        }

        let mut bound = 0;
        for relay in table.relays() {
            if !self.relays.contains_key(&relay) && self.relay_socket(relay).await.is_some() {
                bound += 1;
            }
        }

        if !stale.is_empty() || bound > 0 {
            debug!(closed = stale.len(), bound, "Relay sockets reconciled");
        }
        (stale.len(), bound)
    }
}

/// Peer traffic arriving on one relay socket
async fn read_relay(
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
    processor: Processor,
    interfaces: InterfaceSockets,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!(relay = %relay, error = %e, "Relay receive failed");
                continue;
            }
        };

        let response = match processor.relay_inbound(relay, peer, &buf[..len]) {
            Some(response) => response,
            None => {
                trace!(relay = %relay, peer = %peer, "Dropping packet from unpermitted peer");
                continue;
            }
        };

        let (Some(interface), Some(client)) = (response.interface, response.target) else {
            continue;
        };
        if let Some(socket) = interfaces.get(&interface) {
            if let Err(e) = socket.send_to(&response.data, client).await {
                warn!(client = %client, error = %e, "Failed to forward peer data");
            }
        }
    }
}

async fn handle(processor: &Processor, router: &Router, socket: &UdpSocket, datagram: &[u8], from: SocketAddr) {
    match processor.process(datagram, from).await {
        Ok(Some(response)) => router.deliver(response, from, socket).await,
        Ok(None) => {}
        Err(e) => debug!(client = %from, error = %e, "Dropping datagram"),
    }
}

/// Datagrams on one listening interface
async fn serve(listener: Listener, router: Router, pending: Arc<Semaphore>) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let (len, from) = match listener.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!(interface = %listener.processor.interface(), error = %e, "Receive failed");
                continue;
            }
        };
        let datagram = &buf[..len];

        if peek_class(datagram) != Some(Class::Request) {
            handle(&listener.processor, &router, &listener.socket, datagram, from).await;
            continue;
        }

        let permit = match pending.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(client = %from, "Too many pending requests, dropping request");
                continue;
            }
        };
        let datagram = datagram.to_vec();
        let processor = listener.processor.clone();
        let socket = listener.socket.clone();
        let router = router.clone();
        tokio::spawn(async move {
            handle(&processor, &router, &socket, &datagram, from).await;
            drop(permit);
        });
    }
}

/// Opens and closes relay sockets as allocations come and go
async fn observe(mut events: mpsc::Receiver<Event>, router: Router, period: Duration) {
    let mut reconcile = tokio::time::interval(period);
    reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut open = true;

    loop {
        tokio::select! {
            event = events.recv(), if open => match event {
                Some(event) => router.apply(&event).await,
                None => {
                    debug!("Event channel closed");
                    open = false;
                }
            },
            _ = reconcile.tick() => {
                router.reconcile().await;
            }
        }
    }
}

/// UDP TURN server
pub struct RelayServer {
    service: Service,
    listeners: Vec<Listener>,
    router: Router,
    events: mpsc::Receiver<Event>,
    max_pending_requests: usize,
    reconcile_interval: Duration,
}

impl RelayServer {
    /// Bind every interface.
    ///
    /// An external address with port 0 takes the port the interface bound.
    pub async fn bind(
        service: Service,
        events: mpsc::Receiver<Event>,
        interfaces: &[InterfaceConfig],
    ) -> RelayResult<Self> {
        if interfaces.is_empty() {
            return Err(RelayError::InvalidConfig("no interfaces configured".to_string()));
        }

        let mut listeners = Vec::with_capacity(interfaces.len());
        let mut sockets = HashMap::new();
        let mut relay_binds = HashMap::new();

        for interface in interfaces {
            let socket = UdpSocket::bind(interface.bind).await.map_err(|e| {
                RelayError::NetworkError(format!("Failed to bind {}: {}", interface.bind, e))
            })?;
            let local = socket
                .local_addr()
                .map_err(|e| RelayError::NetworkError(e.to_string()))?;

            let mut external = interface.external;
            if external.port() == 0 {
                external.set_port(local.port());
            }

            let socket = Arc::new(socket);
            let processor = service.processor(local, external);
            relay_binds
                .entry(external.ip())
                .or_insert_with(|| (local.ip(), processor.clone()));
            sockets.insert(local, socket.clone());

            info!(interface = %local, external = %external, "Interface bound");
            listeners.push(Listener { socket, processor });
        }

        Ok(Self {
            router: Router {
                service: service.clone(),
                interfaces: Arc::new(sockets),
                relay_binds: Arc::new(relay_binds),
                relays: Arc::new(DashMap::new()),
            },
            service,
            listeners,
            events,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        })
    }

    /// Requests handled concurrently before new ones are dropped
    pub fn with_max_pending_requests(mut self, limit: usize) -> Self {
        self.max_pending_requests = limit.max(1);
        self
    }

    pub fn with_reconcile_interval(mut self, period: Duration) -> Self {
        if !period.is_zero() {
            self.reconcile_interval = period;
        }
        self
    }

    /// Local addresses of the listening interfaces
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .map(|listener| listener.processor.interface())
            .collect()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Serve until a task stops or the future is dropped
    pub async fn run(self) -> RelayResult<()> {
        let pending = Arc::new(Semaphore::new(self.max_pending_requests));
        let mut tasks = JoinSet::new();
        for listener in self.listeners {
            tasks.spawn(serve(listener, self.router.clone(), pending.clone()));
        }
        tasks.spawn(observe(self.events, self.router.clone(), self.reconcile_interval));

        info!(interfaces = self.router.interfaces.len(), "Relay server running");

        match tasks.join_next().await {
            Some(Err(e)) => Err(RelayError::ServerError(e.to_string())),
            _ => Ok(()),
        }
    }
}
