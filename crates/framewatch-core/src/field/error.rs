//! Field decode errors

use thiserror::Error;

use super::DataType;

/// Why a field could not be decoded from a frame.
///
/// Consumers treat any of these as "no update this cycle".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Field at offset {start} (width {width}) exceeds frame length {len}")]
    OutOfBounds {
        start: usize,
        width: usize,
        len: usize,
    },

    #[error("Width {width} is invalid for {data_type:?}")]
    InvalidWidth { data_type: DataType, width: usize },

    #[error("Bit index {0} out of range 0-7")]
    InvalidBitIndex(u8),

    #[error("Divisor must be greater than zero, got {0}")]
    InvalidDivisor(f64),
}
