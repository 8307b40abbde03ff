//! Error types for trackmate-core.
//!
//! This module defines all error types that can occur when managing tracker
//! tag sessions over Bluetooth Low Energy.
//!
//! # Error Policy
//!
//! | Error class | Scope of damage |
//! |-------------|-----------------|
//! | [`Error::Parse`] | One reading; the session stays up |
//! | [`Error::ConnectionFailed`] | One session; the manager stays up |
//! | [`Error::AdapterUnavailable`] | Scanning force-stops, surfaced as an event |
//! | [`Error::ForcedDisconnect`] | One session, removed during shutdown |
//!
//! A single malformed packet must never disconnect a device, and a single
//! failing device must never crash the manager.

use std::time::Duration;

use thiserror::Error;

use trackmate_types::ParseError;

/// Errors that can occur when managing tracker tag sessions.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The Bluetooth adapter is missing or not powered on.
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// Scan permissions have not been granted.
    ///
    /// The caller owns permission acquisition; the scan controller only
    /// checks, never prompts.
    #[error("scan permissions not granted")]
    PermissionDenied,

    /// Device not found in the registry or during connection.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while not connected to the device.
    #[error("not connected to device")]
    NotConnected,

    /// Failed to decode a telemetry payload.
    #[error("telemetry decode failed: {0}")]
    Parse(#[from] ParseError),

    /// A scan was force-stopped by a mid-scan radio error.
    #[error("scan interrupted: {0}")]
    ScanInterrupted(String),

    /// A device did not acknowledge disconnect within the shutdown timeout
    /// and was force-removed from the active set.
    #[error("device {device_id} force-removed after unacknowledged disconnect")]
    ForcedDisconnect {
        /// The device that failed to acknowledge the disconnect.
        device_id: String,
    },

    /// Connection or service discovery failed for a specific device.
    #[error("connection failed for {device_id}: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: String,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Operation timed out.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// The platform connect handshake failed.
    ConnectFailed(String),
    /// Connected, but GATT service discovery failed.
    ServiceDiscoveryFailed(String),
    /// The handshake or discovery timed out.
    Timeout,
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            Self::ServiceDiscoveryFailed(msg) => write!(f, "service discovery failed: {}", msg),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// The id is unknown to the device registry.
    UnknownId { id: String },
    /// No Bluetooth adapter available on this host.
    NoAdapter,
    /// The platform no longer knows the peripheral (e.g. cache flushed).
    PeripheralGone { id: String },
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownId { id } => write!(f, "'{}' is not in the registry", id),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
            Self::PeripheralGone { id } => write!(f, "peripheral '{}' no longer known", id),
        }
    }
}

impl Error {
    /// Create a device not found error for an id the registry does not know.
    pub fn unknown_device(id: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::UnknownId { id: id.into() })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: impl Into<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed {
            device_id: device_id.into(),
            reason,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using trackmate-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
