//! # framewatch Core Library
//!
//! Core functionality for the framewatch serial stream monitor.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Fixed-length frame synchronization over a raw byte stream, for a
//!   built-in protocol and any number of user-defined ones
//! - Checksums (CRC16 CCITT/XMODEM/MODBUS, 8-bit sum, 8-bit XOR)
//! - Typed field decoding into curves, displays, bit windows and a clock
//! - Traffic grouping by line silence
//! - Automatic reconnection after a device disappears
//! - Periodic command senders
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Instant;
//! use framewatch_core::prelude::*;
//! use framewatch_core::device::shared;
//!
//! # fn main() -> Result<(), MonitorError> {
//! let mut monitor = Monitor::new(MonitorConfig::default(), shared(SerialByteSource::new()))?;
//! monitor.connect(SerialParams::new("/dev/ttyUSB0"), Instant::now())?;
//!
//! // Bytes as handed over by the reader task
//! let chunk: Vec<u8> = Vec::new();
//! for event in monitor.on_chunk(&chunk, Instant::now()) {
//!     if let MonitorEvent::Frame(frame) = event {
//!         println!("[{}] {}", frame.protocol(), frame.to_hex());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod config;
pub mod demo;
pub mod device;
pub mod field;
pub mod protocol;
pub mod recovery;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod timing;
pub mod traffic;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checksum::ChecksumKind;
    pub use crate::config::{ConfigError, MonitorConfig};
    pub use crate::demo::{DemoDevice, DemoSource};
    pub use crate::device::{
        ByteSource, DeviceError, MockByteSource, SerialByteSource, SerialParams, SharedSource,
    };
    pub use crate::field::{
        ConsumerSet, ConsumerUpdate, CurveConfig, DataType, DecodeError, DisplayConfig,
        Endianness, FieldDescriptor, SlotId, Value,
    };
    pub use crate::protocol::{
        Frame, FrameSynchronizer, PresetCommand, ProtocolDefinition, ProtocolError,
        ProtocolRegistry, TimeCalibration,
    };
    pub use crate::recovery::{ConnectionRecovery, RecoveryState};
    pub use crate::runtime::MonitorCommand;
    pub use crate::session::{Monitor, MonitorError, MonitorEvent, RecoveryEvent};
    pub use crate::timing::FrameTimingGrouper;
    pub use crate::traffic::{Direction, TrafficLog, TrafficRecord};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
