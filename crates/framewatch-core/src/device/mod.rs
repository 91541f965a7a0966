//! Byte Sources
//!
//! The transport the monitor reads from and writes to. The core depends only
//! on the [`ByteSource`] trait; [`SerialByteSource`] talks to real ports and
//! [`MockByteSource`] replays scripted traffic.

mod error;
mod mock;
mod serial;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

pub use error::DeviceError;
pub use mock::MockByteSource;
pub use serial::{list_ports, PortInfo, SerialByteSource};

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Baud rates offered for selection
pub const BAUD_RATES: [u32; 12] = [
    1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

/// Stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

/// Parity bit mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

/// Connection parameters for a byte source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
    /// Device identifier, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Line speed
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    /// Character size
    #[serde(default)]
    pub data_bits: DataBits,
    /// Stop bits
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Parity
    #[serde(default)]
    pub parity: Parity,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD_RATE
}

impl SerialParams {
    /// 8N1 at the default baud rate
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            stop_bits: StopBits::default(),
            parity: Parity::default(),
        }
    }

    /// Override the baud rate
    pub fn with_baud(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

impl Default for SerialParams {
    fn default() -> Self {
        Self::new("")
    }
}

/// A transport that can be opened, polled for bytes and written to
pub trait ByteSource: Send {
    /// Open the device described by `params`
    fn open(&mut self, params: &SerialParams) -> Result<(), DeviceError>;

    /// Close the device; a no-op when already closed
    fn close(&mut self);

    /// Whether a device is open
    fn is_open(&self) -> bool;

    /// Bytes received since the last call, possibly none. Never blocks for
    /// longer than a short read timeout.
    fn read_available(&mut self) -> Result<Vec<u8>, DeviceError>;

    /// Write all of `bytes`
    fn write(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Identifiers of the devices currently present
    fn enumerate(&self) -> Vec<String>;
}

/// A byte source shared between the reader task and the processing context
pub type SharedSource = Arc<Mutex<Box<dyn ByteSource>>>;

/// Wrap a byte source for sharing
pub fn shared(source: impl ByteSource + 'static) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}
