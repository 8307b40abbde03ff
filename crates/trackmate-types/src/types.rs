//! Core types for tracker tag state.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use time::OffsetDateTime;

/// Immutable identity of a tracker tag, created on first discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceIdentity {
    /// Platform-assigned address string (MAC address on Linux/Windows,
    /// a CoreBluetooth UUID on macOS). Unique per device per host.
    pub id: String,
    /// Name from the advertisement, if the tag broadcast one.
    pub advertised_name: Option<String>,
}

impl DeviceIdentity {
    /// Create a new identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            advertised_name: None,
        }
    }

    /// Create an identity with an advertised name.
    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            advertised_name: Some(name.into()),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.advertised_name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Connection lifecycle state of a tracker tag.
///
/// Transitions are driven exclusively by the device's connection session;
/// see the state machine in trackmate-core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new states
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum ConnectionState {
    /// Seen during a scan, no connection attempted.
    Discovered,
    /// Platform connect handshake in flight.
    Connecting,
    /// Connected, enumerating GATT services and characteristics.
    ServiceDiscovery,
    /// Steady state: subscribed and receiving telemetry notifications.
    Monitoring,
    /// User-initiated teardown in flight.
    Disconnecting,
    /// Cleanly disconnected (user-initiated or radio drop).
    Disconnected,
    /// Connect or service discovery failed; terminal.
    Failed,
}

impl ConnectionState {
    /// Whether the device currently holds (or is negotiating) a connection.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ServiceDiscovery | Self::Monitoring | Self::Disconnecting
        )
    }

    /// Whether this state admits no further transitions.
    ///
    /// A new `connect()` builds a fresh session rather than resuming one in
    /// a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::ServiceDiscovery => "service discovery",
            Self::Monitoring => "monitoring",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A battery reading with its observation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatteryReading {
    /// Battery level, 0-100.
    pub percent: u8,
    /// When the reading was observed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub observed_at: OffsetDateTime,
}

/// A location fix with its observation time.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocationFix {
    /// Latitude in decimal degrees, [-90, 90].
    pub latitude: f64,
    /// Longitude in decimal degrees, [-180, 180].
    pub longitude: f64,
    /// When the fix was observed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub observed_at: OffsetDateTime,
}

/// Mutable per-device record: identity plus last-known telemetry.
///
/// Telemetry fields only ever move forward in time: an out-of-order reading
/// with an older `observed_at` is discarded rather than regressing the
/// record to stale data.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceRecord {
    /// The device's immutable identity.
    pub identity: DeviceIdentity,
    /// Current connection lifecycle state.
    pub connection_state: ConnectionState,
    /// Last accepted battery reading.
    pub last_battery: Option<BatteryReading>,
    /// Last accepted location fix.
    pub last_location: Option<LocationFix>,
    /// Signal strength at last discovery, dBm.
    pub rssi: Option<i16>,
    /// When the device was last seen (advertisement or telemetry).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub last_seen_at: OffsetDateTime,
}

impl DeviceRecord {
    /// Create a fresh record for a newly discovered device.
    pub fn discovered(identity: DeviceIdentity, rssi: Option<i16>, now: OffsetDateTime) -> Self {
        Self {
            identity,
            connection_state: ConnectionState::Discovered,
            last_battery: None,
            last_location: None,
            rssi,
            last_seen_at: now,
        }
    }

    /// Apply a battery reading, rejecting out-of-order stale data.
    ///
    /// Returns `true` if the reading was accepted.
    pub fn apply_battery(&mut self, percent: u8, observed_at: OffsetDateTime) -> bool {
        if let Some(prev) = &self.last_battery
            && observed_at < prev.observed_at
        {
            return false;
        }
        self.last_battery = Some(BatteryReading {
            percent,
            observed_at,
        });
        self.touch(observed_at);
        true
    }

    /// Apply a location fix, rejecting out-of-order stale data.
    ///
    /// Returns `true` if the fix was accepted.
    pub fn apply_location(
        &mut self,
        latitude: f64,
        longitude: f64,
        observed_at: OffsetDateTime,
    ) -> bool {
        if let Some(prev) = &self.last_location
            && observed_at < prev.observed_at
        {
            return false;
        }
        self.last_location = Some(LocationFix {
            latitude,
            longitude,
            observed_at,
        });
        self.touch(observed_at);
        true
    }

    /// Record a fresh sighting (advertisement), refreshing rssi and last-seen.
    pub fn refresh_sighting(&mut self, rssi: Option<i16>, now: OffsetDateTime) {
        if rssi.is_some() {
            self.rssi = rssi;
        }
        self.touch(now);
    }

    fn touch(&mut self, at: OffsetDateTime) {
        if at > self.last_seen_at {
            self.last_seen_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn t0() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn test_identity_display() {
        let id = DeviceIdentity::with_name("AA:BB", "TrackMate Tag");
        assert_eq!(id.to_string(), "TrackMate Tag (AA:BB)");

        let bare = DeviceIdentity::new("AA:BB");
        assert_eq!(bare.to_string(), "AA:BB");
    }

    #[test]
    fn test_connection_state_classification() {
        assert!(ConnectionState::Monitoring.is_active());
        assert!(ConnectionState::Connecting.is_active());
        assert!(!ConnectionState::Discovered.is_active());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Monitoring.is_terminal());
    }

    #[test]
    fn test_battery_staleness_guard() {
        let mut record = DeviceRecord::discovered(DeviceIdentity::new("AA:BB"), Some(-60), t0());

        assert!(record.apply_battery(75, t0() + Duration::seconds(10)));
        // Older reading arrives late; must not regress
        assert!(!record.apply_battery(40, t0() + Duration::seconds(5)));
        assert_eq!(record.last_battery.unwrap().percent, 75);

        // Equal timestamp replaces (newest writer wins)
        assert!(record.apply_battery(74, t0() + Duration::seconds(10)));
        assert_eq!(record.last_battery.unwrap().percent, 74);
    }

    #[test]
    fn test_location_staleness_order_independent() {
        let early = t0() + Duration::seconds(1);
        let late = t0() + Duration::seconds(2);

        // Apply in order
        let mut a = DeviceRecord::discovered(DeviceIdentity::new("AA:BB"), None, t0());
        assert!(a.apply_location(1.0, 2.0, early));
        assert!(a.apply_location(3.0, 4.0, late));

        // Apply reversed
        let mut b = DeviceRecord::discovered(DeviceIdentity::new("AA:BB"), None, t0());
        assert!(b.apply_location(3.0, 4.0, late));
        assert!(!b.apply_location(1.0, 2.0, early));

        // Either order leaves the t2 fix in place
        assert_eq!(a.last_location, b.last_location);
        assert_eq!(a.last_location.unwrap().latitude, 3.0);
    }

    #[test]
    fn test_refresh_sighting_keeps_rssi_when_absent() {
        let mut record = DeviceRecord::discovered(DeviceIdentity::new("AA:BB"), Some(-55), t0());

        record.refresh_sighting(None, t0() + Duration::seconds(1));
        assert_eq!(record.rssi, Some(-55));

        record.refresh_sighting(Some(-70), t0() + Duration::seconds(2));
        assert_eq!(record.rssi, Some(-70));
        assert_eq!(record.last_seen_at, t0() + Duration::seconds(2));
    }

    #[test]
    fn test_last_seen_never_moves_backwards() {
        let mut record = DeviceRecord::discovered(DeviceIdentity::new("AA:BB"), None, t0());
        record.refresh_sighting(None, t0() + Duration::seconds(10));
        record.apply_battery(50, t0() + Duration::seconds(5));
        assert_eq!(record.last_seen_at, t0() + Duration::seconds(10));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_record_serde_round_trip() {
        let mut record =
            DeviceRecord::discovered(DeviceIdentity::with_name("AA:BB", "Tag"), Some(-60), t0());
        record.apply_battery(80, t0());
        record.apply_location(37.7749, -122.4194, t0());

        let json = serde_json::to_string(&record).unwrap();
        let back: DeviceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
