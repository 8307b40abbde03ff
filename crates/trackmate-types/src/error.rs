//! Error types for telemetry payload parsing.

use thiserror::Error;

/// Errors that can occur when decoding tracker telemetry payloads.
///
/// This error type is platform-agnostic and does not include BLE-specific
/// errors (those belong in trackmate-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Payload length did not match the fixed characteristic layout.
    #[error("malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload {
        /// Expected payload size.
        expected: usize,
        /// Actual payload size received.
        actual: usize,
    },

    /// Payload decoded but the value is outside its valid domain.
    #[error("out of range value: {0}")]
    OutOfRangeValue(String),
}

/// Result type alias using trackmate-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
