//! Event bus for pipeline, connection and scanner notifications
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! This is the event surface exposed to a UI or service host.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::connection::ConnectionState;
use crate::discovery::DiscoveredDevice;
use crate::error::ErrorKind;

/// Event types that can be published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    /// The controller connection was (re-)established
    Connected { endpoint: String },
    /// Any error condition, classified
    ConnectionError { code: ErrorKind, message: String },
    ConnectionStateChanged { state: ConnectionState },
    /// Capture started or stopped
    CaptureStatus { capturing: bool },
    DeviceDiscovered { device: DiscoveredDevice },
    ShuttingDown,
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pubsub() {
        let bus = create_bus();
        let mut rx = bus.subscribe();

        bus.publish(BusEvent::ConnectionError {
            code: ErrorKind::Transport,
            message: "reset".to_string(),
        });

        match rx.recv().await.unwrap() {
            BusEvent::ConnectionError { code, message } => {
                assert_eq!(code, ErrorKind::Transport);
                assert_eq!(message, "reset");
            }
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = create_bus();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(BusEvent::CaptureStatus { capturing: true });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            BusEvent::CaptureStatus { capturing: true }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            BusEvent::CaptureStatus { capturing: true }
        ));
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(BusEvent::CaptureStatus { capturing: false }).unwrap();
        assert_eq!(json["type"], "CaptureStatus");
        assert_eq!(json["payload"]["capturing"], false);
    }
}
