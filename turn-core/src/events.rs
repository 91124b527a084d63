//! Lifecycle events delivered to the host application
//!
//! Events travel over a bounded channel. A full or closed channel drops the
//! event; protocol processing never waits on the observer.
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


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Event kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    /// A password lookup is about to be issued
    #[serde(rename = "password.requested")]
    PasswordRequested { addr: SocketAddr, username: String },

    /// Allocation created
    #[serde(rename = "allocation.created")]
    Allocated {
        addr: SocketAddr,
        username: String,
        port: u16,
        relay: SocketAddr,
    },

    /// Binding request answered
    #[serde(rename = "binding.observed")]
    Binding { addr: SocketAddr },

    /// Channel bound or refreshed
    #[serde(rename = "channel.bound")]
    ChannelBind {
        addr: SocketAddr,
        username: String,
        channel: u16,
    },

    /// Permission installed for a new peer
    #[serde(rename = "permission.created")]
    CreatePermission {
        addr: SocketAddr,
        username: String,
        peer: SocketAddr,
    },

    /// Allocation refreshed with a non-zero lifetime
    #[serde(rename = "allocation.refreshed")]
    Refresh {
        addr: SocketAddr,
        username: String,
        lifetime: u32,
    },

    /// Allocation deleted or expired
    #[serde(rename = "allocation.aborted")]
    Abort {
        addr: SocketAddr,
        username: String,
        relay: SocketAddr,
    },
}

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub event_id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    pub kind: TurnEvent,
}

impl Event {
    pub fn new(kind: TurnEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Fire-and-forget sender of [`Event`]s
#[derive(Debug, Clone)]
pub struct EventNotifier {
    sender: Option<mpsc::Sender<Event>>,
}

impl EventNotifier {
    /// Notifier backed by a bounded channel of `capacity` events
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender: Some(sender) }, receiver)
    }

    /// Notifier that discards everything
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn notify(&self, kind: TurnEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        if let Err(e) = sender.try_send(Event::new(kind)) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    warn!(event_id = %event.event_id, "Event channel full, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "203.0.113.5:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_notify_delivers_in_order() {
        let (notifier, mut receiver) = EventNotifier::channel(8);
        notifier.notify(TurnEvent::Binding { addr: addr() });
        notifier.notify(TurnEvent::PasswordRequested {
            addr: addr(),
            username: "alice".into(),
        });

        assert_eq!(receiver.recv().await.unwrap().kind, TurnEvent::Binding { addr: addr() });
        assert!(matches!(
            receiver.recv().await.unwrap().kind,
            TurnEvent::PasswordRequested { .. }
        ));
    }

    #[tokio::test]
    async fn test_full_channel_never_blocks() {
        let (notifier, mut receiver) = EventNotifier::channel(1);
        for _ in 0..10 {
            notifier.notify(TurnEvent::Binding { addr: addr() });
        }
        assert!(receiver.recv().await.is_some());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_closed_and_disabled() {
        let (notifier, receiver) = EventNotifier::channel(1);
        drop(receiver);
        notifier.notify(TurnEvent::Binding { addr: addr() });
        EventNotifier::disabled().notify(TurnEvent::Binding { addr: addr() });
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(TurnEvent::Allocated {
            addr: addr(),
            username: "alice".into(),
            port: 49152,
            relay: "192.0.2.10:49152".parse().unwrap(),
        });
        let json = event.to_json().unwrap();
        assert!(json.contains("\"type\":\"allocation.created\""));
        assert!(json.contains("\"port\":49152"));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.kind, event.kind);
    }
}
