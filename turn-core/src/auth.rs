//! Authentication gateway
//!
//! Bridges the dispatcher to an external, possibly slow, password store.
//! The lookup is the only point where a request suspends; it is bounded by
//! a timeout after which the credentials count as unknown.
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


use crate::events::{EventNotifier, TurnEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Password store consulted for long-term credentials
#[async_trait]
pub trait PasswordLookup: Send + Sync {
    /// Password of `username` as seen from `addr`, or `None` if unknown
    async fn get_password(&self, addr: &SocketAddr, username: &str) -> Option<String>;
}

/// Fixed username -> password table
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    pub fn insert(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl PasswordLookup for StaticCredentials {
    async fn get_password(&self, _addr: &SocketAddr, username: &str) -> Option<String> {
        self.users.get(username).cloned()
    }
}

/// Password request handed to a host that answers over a channel
#[derive(Debug)]
pub struct PasswordRequest {
    pub addr: SocketAddr,
    pub username: String,
    reply: oneshot::Sender<Option<String>>,
}

impl PasswordRequest {
    /// Complete the request. A dropped request counts as unknown credentials.
    pub fn respond(self, password: Option<String>) {
        let _ = self.reply.send(password);
    }
}

/// [`PasswordLookup`] answered by whoever drains the paired receiver
#[derive(Debug, Clone)]
pub struct ChannelLookup {
    sender: mpsc::Sender<PasswordRequest>,
}

impl ChannelLookup {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PasswordRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl PasswordLookup for ChannelLookup {
    async fn get_password(&self, addr: &SocketAddr, username: &str) -> Option<String> {
        let (reply, completion) = oneshot::channel();
        let request = PasswordRequest {
            addr: *addr,
            username: username.to_string(),
            reply,
        };

        if self.sender.send(request).await.is_err() {
            debug!(client = %addr, "Password channel closed");
            return None;
        }

        completion.await.ok().flatten()
    }
}

/// Timeout-bounded password lookup that announces every request
#[derive(Clone)]
pub struct AuthGateway {
    lookup: Arc<dyn PasswordLookup>,
    timeout: Duration,
    events: EventNotifier,
}

impl AuthGateway {
    pub fn new(lookup: Arc<dyn PasswordLookup>, timeout: Duration, events: EventNotifier) -> Self {
        Self {
            lookup,
            timeout,
            events,
        }
    }

    /// Resolve the password for `username`; `None` when unknown or when the
    /// store does not answer in time.
    pub async fn lookup(&self, addr: SocketAddr, username: &str) -> Option<String> {
        self.events.notify(TurnEvent::PasswordRequested {
            addr,
            username: username.to_string(),
        });

        match tokio::time::timeout(self.timeout, self.lookup.get_password(&addr, username)).await {
            Ok(password) => password,
            Err(_) => {
                warn!(
                    client = %addr,
                    username = %username,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Password lookup timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverAnswers;

    #[async_trait]
    impl PasswordLookup for NeverAnswers {
        async fn get_password(&self, _addr: &SocketAddr, _username: &str) -> Option<String> {
            std::future::pending().await
        }
    }

    fn addr() -> SocketAddr {
        "192.0.2.1:5000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let mut store = StaticCredentials::default();
        store.insert("alice", "secret");
        let gateway = AuthGateway::new(Arc::new(store), Duration::from_secs(1), EventNotifier::disabled());

        assert_eq!(gateway.lookup(addr(), "alice").await, Some("secret".to_string()));
        assert_eq!(gateway.lookup(addr(), "mallory").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_times_out() {
        let gateway = AuthGateway::new(Arc::new(NeverAnswers), Duration::from_secs(5), EventNotifier::disabled());
        assert_eq!(gateway.lookup(addr(), "alice").await, None);
    }

    #[tokio::test]
    async fn test_channel_lookup_round_trip() {
        let (lookup, mut requests) = ChannelLookup::new(4);
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let password = (request.username == "alice").then(|| "secret".to_string());
                request.respond(password);
            }
        });

        let (events, mut observed) = EventNotifier::channel(4);
        let gateway = AuthGateway::new(Arc::new(lookup), Duration::from_secs(1), events);
        assert_eq!(gateway.lookup(addr(), "alice").await, Some("secret".to_string()));
        assert_eq!(gateway.lookup(addr(), "bob").await, None);

        let first = observed.recv().await.unwrap();
        assert_eq!(
            first.kind,
            TurnEvent::PasswordRequested {
                addr: addr(),
                username: "alice".into()
            }
        );
    }

    #[tokio::test]
    async fn test_lookup_waits_for_host() {
        let (lookup, mut requests) = ChannelLookup::new(1);
        let gateway = AuthGateway::new(Arc::new(lookup), Duration::from_secs(60), EventNotifier::disabled());

        let mut pending = tokio_test::task::spawn(gateway.lookup(addr(), "alice"));
        tokio_test::assert_pending!(pending.poll());

        let request = requests.recv().await.unwrap();
        assert_eq!(request.username, "alice");
        request.respond(Some("secret".into()));

        assert!(pending.is_woken());
        tokio_test::assert_ready_eq!(pending.poll(), Some("secret".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_request_is_unknown() {
        let (lookup, mut requests) = ChannelLookup::new(1);
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                drop(request);
            }
        });

        assert_eq!(lookup.get_password(&addr(), "alice").await, None);
    }
}
