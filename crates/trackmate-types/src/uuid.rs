//! Bluetooth UUIDs for TrackMate tracker tags.
//!
//! The tracker GATT profile is a fixed external contract: one custom service
//! exposing a battery characteristic and a location characteristic, both
//! notify-only from the tag's point of view.

use uuid::{Uuid, uuid};

/// Custom tracker tag service UUID.
pub const TRACKER_SERVICE: Uuid = uuid!("4fafc201-1fb5-459e-8fcc-c5c9c331914b");

/// Battery level characteristic (1 byte, percentage).
pub const BATTERY_CHARACTERISTIC: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Location characteristic (8 bytes, two little-endian f32: latitude, longitude).
pub const LOCATION_CHARACTERISTIC: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_service_uuid() {
        let expected = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";
        assert_eq!(TRACKER_SERVICE.to_string(), expected);
    }

    #[test]
    fn test_battery_characteristic_uuid() {
        let expected = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";
        assert_eq!(BATTERY_CHARACTERISTIC.to_string(), expected);
    }

    #[test]
    fn test_location_characteristic_uuid() {
        let expected = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";
        assert_eq!(LOCATION_CHARACTERISTIC.to_string(), expected);
    }

    #[test]
    fn test_uuids_are_distinct() {
        assert_ne!(TRACKER_SERVICE, BATTERY_CHARACTERISTIC);
        assert_ne!(BATTERY_CHARACTERISTIC, LOCATION_CHARACTERISTIC);
        assert_ne!(TRACKER_SERVICE, LOCATION_CHARACTERISTIC);
    }

    #[test]
    fn test_characteristic_prefix() {
        // Both tracker characteristics live in the 6e4000xx Nordic UART-style block
        for uuid in [BATTERY_CHARACTERISTIC, LOCATION_CHARACTERISTIC] {
            assert!(
                uuid.to_string().starts_with("6e4000"),
                "UUID {} should start with 6e4000",
                uuid
            );
        }
    }
}
