//! Device errors

use std::time::Duration;

use thiserror::Error;

/// Errors raised by byte sources and connection recovery
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Failed to open {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Device is not open")]
    NotOpen,

    #[error("Reconnect to {port} failed: {reason}")]
    ReconnectFailed { port: String, reason: String },

    #[error("Device {port} did not come back within {timeout:?}")]
    RecoveryTimeout { port: String, timeout: Duration },
}

impl DeviceError {
    /// Whether this error means the device went away mid-session
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DeviceError::Io(_))
    }
}
