//! Protocol errors

use thiserror::Error;

/// Errors raised while validating protocol or command configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Protocol name must not be empty")]
    EmptyName,

    #[error("Protocol name '{0}' is reserved for the built-in protocol")]
    ReservedName(String),

    #[error("Duplicate protocol name: {0}")]
    DuplicateName(String),

    #[error("Frame length {length} is shorter than the {minimum} bytes needed for header, tail and checksum")]
    InvalidLength { length: usize, minimum: usize },

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Command payload too short: need {needed} bytes, got {actual}")]
    PayloadTooShort { needed: usize, actual: usize },

    #[error("Fill value {value} outside range [{min}, {max}]")]
    FillOutOfRange { value: u16, min: u16, max: u16 },

    #[error("Invalid send period: {0} s")]
    InvalidPeriod(f64),
}

/// Non-fatal framing anomalies.
///
/// These are recorded and logged by the synchronizer and always resolved
/// locally by resynchronization; they never surface as an `Err` from `feed`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAnomaly {
    #[error("Frame header not found")]
    HeaderNotFound,

    #[error("Insufficient data: need {needed} bytes, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Frame tail mismatch")]
    TailMismatch,

    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}
