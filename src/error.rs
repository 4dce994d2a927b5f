//! Error types for sensorlink.

use thiserror::Error;

/// Reason a packet could not be decoded.
///
/// A decode failure means none of the packet's fields may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Buffer too short for the type/reference header, or reference is 0.
    #[error("malformed packet header")]
    MalformedHeader,

    /// Type tag outside the known packet range.
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    /// Body shorter than the fixed layout of the claimed packet type.
    #[error("truncated payload: need {needed} bytes, got {actual}")]
    TruncatedPayload {
        /// Minimum number of bytes the layout requires.
        needed: usize,
        /// Number of bytes actually received.
        actual: usize,
    },

    /// A field carries a value the layout does not allow.
    #[error("invalid value {value} for field `{field}`")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending raw value.
        value: u32,
    },
}

/// Main error type for all sensorlink operations.
#[derive(Debug, Error)]
pub enum SensorError {
    /// Packet decode failure.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The transport rejected an operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON error while loading settings.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session settings are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session already went through a connection and cannot be reused.
    #[error("Session already used for a previous connection")]
    SessionSpent,

    /// The sensor task has stopped.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using SensorError.
pub type Result<T> = std::result::Result<T, SensorError>;
