//! Platform-agnostic types for TrackMate BLE tracker tags.
//!
//! This crate provides the shared data model consumed by the session-manager
//! engine (trackmate-core) and by composing applications.
//!
//! # Features
//!
//! - Device identity and per-device telemetry records
//! - Connection lifecycle states
//! - UUID constants for the tracker GATT profile
//! - Error types for payload parsing

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    BatteryReading, ConnectionState, DeviceIdentity, DeviceRecord, LocationFix,
};
pub use self::uuid as uuids;
