//! Protocol definitions
//!
//! A protocol definition is the fixed byte layout of one frame type:
//! header, tail, total length and trailing checksum.

use serde::{Deserialize, Serialize};

use super::{ProtocolError, DEFAULT_FRAME_LENGTH, DEFAULT_HEADER, DEFAULT_PROTOCOL_NAME, DEFAULT_TAIL};
use crate::checksum::ChecksumKind;

fn default_enabled() -> bool {
    true
}

/// Framing rule for one protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDefinition {
    /// Unique protocol name
    pub name: String,
    /// Start-of-frame marker (may be empty)
    #[serde(default)]
    pub header: Vec<u8>,
    /// End-of-frame marker (may be empty)
    #[serde(default)]
    pub tail: Vec<u8>,
    /// Total frame length including header, tail and checksum
    pub length: usize,
    /// Trailing checksum
    #[serde(default)]
    pub checksum: ChecksumKind,
    /// Whether the protocol participates in decoding
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ProtocolDefinition {
    /// Create and validate an enabled custom protocol
    pub fn new(
        name: impl Into<String>,
        header: Vec<u8>,
        tail: Vec<u8>,
        length: usize,
        checksum: ChecksumKind,
    ) -> Result<Self, ProtocolError> {
        let def = Self {
            name: name.into(),
            header,
            tail,
            length,
            checksum,
            enabled: true,
        };
        def.validate()?;
        Ok(def)
    }

    /// The built-in protocol: `A8 A8 .. AA AA`, 38 bytes, no checksum
    pub fn builtin() -> Self {
        Self {
            name: DEFAULT_PROTOCOL_NAME.to_string(),
            header: DEFAULT_HEADER.to_vec(),
            tail: DEFAULT_TAIL.to_vec(),
            length: DEFAULT_FRAME_LENGTH,
            checksum: ChecksumKind::None,
            enabled: true,
        }
    }

    /// Smallest frame length that fits header, tail and checksum
    pub fn min_length(&self) -> usize {
        (self.header.len() + self.tail.len() + self.checksum.byte_len()).max(1)
    }

    /// Check the structural invariants of a custom definition
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.name.trim().is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        if self.name == DEFAULT_PROTOCOL_NAME {
            return Err(ProtocolError::ReservedName(self.name.clone()));
        }
        let minimum = self.min_length();
        if self.length < minimum {
            return Err(ProtocolError::InvalidLength {
                length: self.length,
                minimum,
            });
        }
        Ok(())
    }

    /// Whether this definition uses the built-in protocol's header
    pub fn shares_default_header(&self) -> bool {
        self.header == DEFAULT_HEADER
    }
}
