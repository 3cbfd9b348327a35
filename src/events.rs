//! Lifecycle status events
//!
//! Fan-out by composition: the manager owns an `EventBus` and exposes
//! `subscribe()`; consumers (the HTTP layer's status poller) hold a
//! broadcast receiver. No inherited emitter, no global channel.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::registry::InstanceStatus;

/// What happened to an instance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum StatusEventKind {
    /// The instance entered a new lifecycle status
    StatusChanged(InstanceStatus),
    /// The instance was closed (explicitly or by disconnect) and its
    /// registry entry removed
    Closed,
    /// A runtime error was observed; the instance may still be live
    Error(String),
}

/// A lifecycle event for one named instance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub name: String,
    #[serde(flatten)]
    pub kind: StatusEventKind,
}

/// Broadcast bus for status events
pub struct EventBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; no subscribers is not an error
    pub fn publish(&self, name: &str, kind: StatusEventKind) {
        let _ = self.tx.send(StatusEvent {
            name: name.to_string(),
            kind,
        });
    }

    pub fn status_changed(&self, name: &str, status: InstanceStatus) {
        self.publish(name, StatusEventKind::StatusChanged(status));
    }

    pub fn closed(&self, name: &str) {
        self.publish(name, StatusEventKind::Closed);
    }

    pub fn error(&self, name: &str, message: impl Into<String>) {
        self.publish(name, StatusEventKind::Error(message.into()));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.status_changed("alpha", InstanceStatus::Running);
        bus.closed("alpha");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "alpha");
        assert!(matches!(
            first.kind,
            StatusEventKind::StatusChanged(InstanceStatus::Running)
        ));

        let second = rx.recv().await.unwrap();
        assert!(matches!(second.kind, StatusEventKind::Closed));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.error("alpha", "boom");
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new();
        bus.closed("alpha");
        let mut rx = bus.subscribe();
        bus.closed("beta");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "beta");
    }
}
