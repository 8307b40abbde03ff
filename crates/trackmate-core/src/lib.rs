//! Core BLE engine for TrackMate tracker tags.
//!
//! This crate manages the full telemetry lifecycle for BLE item trackers:
//! scanning for tags advertising the tracker service, maintaining at most
//! one connection session per tag, decoding battery and location
//! notifications, and keeping an in-memory registry of everything observed.
//!
//! # Features
//!
//! - **Discovery**: time-boxed scans with per-session de-duplication
//! - **Connection sessions**: connect, GATT discovery, characteristic
//!   subscriptions, and teardown as an explicit state machine
//! - **Telemetry decoding**: battery percentage and location fixes with
//!   strict validation; malformed payloads never tear a session down
//! - **Multi-device support**: independent concurrent sessions behind one
//!   manager
//! - **Events**: every observable change fans out through a broadcast
//!   channel
//! - **Risk scoring**: a pluggable seam for loss-risk assessment
//!
//! The manager is generic over the [`traits::BleAdapter`] surface, so the
//! [`mock`] module drives the same code paths in tests that
//! [`platform::SystemAdapter`] drives in production.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use trackmate_core::manager::{ManagerConfig, SessionManager};
//! use trackmate_core::platform::SystemAdapter;
//! use trackmate_core::traits::AlwaysGranted;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(SystemAdapter::new().await?);
//!     let manager = SessionManager::new(
//!         adapter,
//!         Arc::new(AlwaysGranted),
//!         ManagerConfig::default(),
//!     );
//!
//!     let mut events = manager.events();
//!     manager.start_scan().await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod platform;
pub mod registry;
pub mod risk;
pub mod scan;
pub mod session;
pub mod telemetry;
pub mod traits;

// Re-export the shared type crate for convenience
pub use trackmate_types::{
    BatteryReading, ConnectionState, DeviceIdentity, DeviceRecord, LocationFix, uuids,
};

pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use events::{DisconnectReason, EventReceiver, TagEvent};
pub use manager::{ManagerConfig, SessionManager};
pub use scan::{ScanOptions, ScanSessionInfo};
pub use session::ConnectionConfig;
