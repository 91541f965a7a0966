//! Field Extraction
//!
//! Decoding typed values out of validated frames, and the consumers that use
//! them (curves, displays, bit windows, the received clock).

mod consumers;
mod error;
mod recorder;
mod types;
mod values;

pub use consumers::{
    BitWindowConfig, ClockConfig, ConsumerSet, ConsumerUpdate, CurveConfig, DisplayConfig,
    ReceivedClock, SlotId, Slots,
};
pub use error::DecodeError;
pub use recorder::{CurveRecorder, CurveSample, MAX_POINTS};
pub use types::{DataType, Endianness, FieldDescriptor};
pub use values::Value;

/// Decode `field` from `frame`
pub fn extract(frame: &[u8], field: &FieldDescriptor) -> Result<Value, DecodeError> {
    field.extract(frame)
}
