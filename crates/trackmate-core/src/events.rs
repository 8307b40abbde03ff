//! Event system for discovery, connection, and telemetry notifications.
//!
//! The session manager publishes typed events through a broadcast channel.
//! Subscribers hold a receiver; dropping the receiver unsubscribes, so
//! repeated connect/disconnect cycles cannot accumulate stale listeners.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use trackmate_types::DeviceIdentity;

/// Events emitted by the session manager.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum TagEvent {
    /// A tracker tag was discovered during scanning (first sighting this
    /// scan session only).
    Discovered {
        device: DeviceIdentity,
        rssi: Option<i16>,
    },
    /// A connection session reached the monitoring state.
    Connected { device_id: String },
    /// A connection session ended.
    Disconnected {
        device_id: String,
        reason: DisconnectReason,
    },
    /// A decoded battery reading was accepted into the registry.
    BatteryUpdate { device_id: String, percent: u8 },
    /// A decoded location fix was accepted into the registry.
    LocationUpdate {
        device_id: String,
        latitude: f64,
        longitude: f64,
    },
    /// A notification payload failed to decode. The session stays up.
    DecodeError { device_id: String, message: String },
    /// The scan was force-stopped by a mid-scan radio error.
    ScanInterrupted { message: String },
    /// The scan window elapsed or the scan was stopped.
    ScanFinished,
    /// A device did not acknowledge disconnect during shutdown and was
    /// force-removed from the active set.
    ForcedDisconnect { device_id: String },
}

/// Reason a connection session ended.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Explicit user-initiated teardown.
    User,
    /// Radio-initiated drop (out of range, tag powered off).
    Lost,
    /// The platform connect handshake failed.
    ConnectFailed,
    /// Connected, but GATT service discovery failed.
    ServiceDiscoveryFailed,
}

/// Sender for tag events.
pub type EventSender = broadcast::Sender<TagEvent>;

/// Receiver for tag events.
pub type EventReceiver = broadcast::Receiver<TagEvent>;

/// Event dispatcher fanning events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: TagEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatcher_fan_out() {
        let dispatcher = EventDispatcher::new(16);
        let mut rx_a = dispatcher.subscribe();
        let mut rx_b = dispatcher.subscribe();

        dispatcher.send(TagEvent::Connected {
            device_id: "AA:BB".into(),
        });

        assert!(matches!(
            rx_a.recv().await.unwrap(),
            TagEvent::Connected { .. }
        ));
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            TagEvent::Connected { .. }
        ));
    }

    #[test]
    fn test_dropping_receiver_unsubscribes() {
        let dispatcher = EventDispatcher::new(16);
        let rx = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 1);
        drop(rx);
        assert_eq!(dispatcher.receiver_count(), 0);
    }

    #[test]
    fn test_send_without_receivers_is_fine() {
        let dispatcher = EventDispatcher::new(16);
        dispatcher.send(TagEvent::ScanFinished);
    }

    #[test]
    fn test_event_serialization() {
        let event = TagEvent::BatteryUpdate {
            device_id: "AA:BB".into(),
            percent: 75,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("battery_update"));
        assert!(json.contains("75"));
    }
}
