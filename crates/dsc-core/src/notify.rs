use dsc_types::{Channel, Event};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Fire-and-forget notification sink.
pub trait Publisher: Send + Sync {
    fn publish(&self, channel: Channel, event: Event, payload: Value);
}

/// One published message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub channel: Channel,
    pub event: Event,
    pub payload: Value,
}

/// In-process publisher fanning out over a tokio broadcast channel.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, channel: Channel, event: Event, payload: Value) {
        let notification = Notification {
            channel,
            event,
            payload,
        };
        // No subscribers is fine
        if self.tx.send(notification).is_err() {
            debug!(%channel, %event, "Notification dropped, no subscribers");
        }
    }
}
