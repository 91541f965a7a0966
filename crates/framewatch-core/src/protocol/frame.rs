//! Validated frames

use chrono::{DateTime, Local};

use super::DEFAULT_PROTOCOL_NAME;

/// A validated, fixed-length frame extracted under one protocol's rules
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    protocol: String,
    bytes: Vec<u8>,
    timestamp: DateTime<Local>,
}

impl Frame {
    /// Create a frame
    pub fn new(protocol: impl Into<String>, bytes: Vec<u8>, timestamp: DateTime<Local>) -> Self {
        Self {
            protocol: protocol.into(),
            bytes,
            timestamp,
        }
    }

    /// Name of the protocol that produced this frame
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Whether this frame came from the built-in protocol
    pub fn is_default(&self) -> bool {
        self.protocol == DEFAULT_PROTOCOL_NAME
    }

    /// Raw frame bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Completion time
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Frame length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the frame is empty (never true for synchronizer output)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Spaced upper-case hex rendering, e.g. `A8 A8 01`
    pub fn to_hex(&self) -> String {
        to_hex(&self.bytes)
    }
}

/// Render bytes as spaced upper-case hex
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
