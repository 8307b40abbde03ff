//! In-memory registry of known tracker tags.
//!
//! The registry is the single source of truth for device identity,
//! connection state, and last-known telemetry. It is owned exclusively by
//! the session manager and never handed out for direct external mutation;
//! callers observe it through cloned [`trackmate_types::DeviceRecord`]
//! snapshots.

use std::collections::HashMap;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::debug;

use trackmate_types::{ConnectionState, DeviceIdentity, DeviceRecord};

use crate::error::{Error, Result};

/// Table of known devices keyed by platform-assigned id.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a discovery sighting, creating the record if absent.
    ///
    /// Existing records keep their connection state and telemetry; only the
    /// rssi, advertised name, and last-seen timestamp are refreshed.
    pub fn upsert_discovered(
        &mut self,
        identity: DeviceIdentity,
        rssi: Option<i16>,
        now: OffsetDateTime,
    ) -> &DeviceRecord {
        let id = identity.id.clone();
        self.devices
            .entry(id)
            .and_modify(|record| {
                if identity.advertised_name.is_some() {
                    record.identity.advertised_name = identity.advertised_name.clone();
                }
                record.refresh_sighting(rssi, now);
            })
            .or_insert_with(|| DeviceRecord::discovered(identity, rssi, now))
    }

    /// Record a battery reading.
    ///
    /// Returns `Ok(false)` when the reading is older than the one already
    /// held (staleness guard), `Ok(true)` when accepted.
    pub fn record_battery(
        &mut self,
        id: &str,
        percent: u8,
        observed_at: OffsetDateTime,
    ) -> Result<bool> {
        let record = self
            .devices
            .get_mut(id)
            .ok_or_else(|| Error::unknown_device(id))?;
        Ok(record.apply_battery(percent, observed_at))
    }

    /// Record a location fix, with the same staleness rule as battery.
    pub fn record_location(
        &mut self,
        id: &str,
        latitude: f64,
        longitude: f64,
        observed_at: OffsetDateTime,
    ) -> Result<bool> {
        let record = self
            .devices
            .get_mut(id)
            .ok_or_else(|| Error::unknown_device(id))?;
        Ok(record.apply_location(latitude, longitude, observed_at))
    }

    /// Set the connection lifecycle state for a device.
    pub fn set_connection_state(&mut self, id: &str, state: ConnectionState) -> Result<()> {
        let record = self
            .devices
            .get_mut(id)
            .ok_or_else(|| Error::unknown_device(id))?;
        record.connection_state = state;
        Ok(())
    }

    /// Get a snapshot of one device record.
    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.devices.get(id)
    }

    /// Snapshot of all known records.
    pub fn all(&self) -> Vec<DeviceRecord> {
        self.devices.values().cloned().collect()
    }

    /// Whether the registry knows this id.
    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Number of known devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Evict records not seen within `ttl` that hold no active connection.
    ///
    /// Long-stale discovered-but-never-connected entries would otherwise
    /// accumulate across scans. Returns the ids of evicted records.
    pub fn prune_stale(&mut self, ttl: Duration, now: OffsetDateTime) -> Vec<String> {
        let cutoff = now - ttl;
        let stale: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, record)| {
                !record.connection_state.is_active() && record.last_seen_at < cutoff
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            debug!(device_id = %id, "evicting stale registry record");
            self.devices.remove(id);
        }
        stale
    }
}
