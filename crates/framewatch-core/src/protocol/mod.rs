//! Frame Protocols
//!
//! Fixed-length framing over a raw serial byte stream.
//!
//! A [`ProtocolDefinition`] describes one frame layout (header, tail, length,
//! checksum). A [`FrameSynchronizer`] extracts validated [`Frame`]s for one
//! definition, and the [`ProtocolRegistry`] fans each received chunk out to
//! the built-in synchronizer and every enabled custom one.

mod definition;
pub mod encoder;
mod error;
mod frame;
mod registry;
mod synchronizer;

pub use definition::ProtocolDefinition;
pub use encoder::{append_checksum, parse_hex, DataFill, PresetCommand, TimeCalibration};
pub use error::{FrameAnomaly, ProtocolError};
pub use frame::{to_hex, Frame};
pub use registry::ProtocolRegistry;
pub(crate) use registry::validate_definitions;
pub use synchronizer::{FrameSynchronizer, SyncStats, BUFFER_CAP, BUFFER_RETAIN};

/// Name of the built-in protocol
pub const DEFAULT_PROTOCOL_NAME: &str = "default";

/// Start-of-frame marker of the built-in protocol
pub const DEFAULT_HEADER: [u8; 2] = [0xA8, 0xA8];

/// End-of-frame marker of the built-in protocol
pub const DEFAULT_TAIL: [u8; 2] = [0xAA, 0xAA];

/// Length of a built-in protocol frame
pub const DEFAULT_FRAME_LENGTH: usize = 38;
