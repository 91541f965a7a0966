//! Monitor configuration
//!
//! Everything a [`Monitor`](crate::session::Monitor) needs, as one serde
//! record. Loading and saving files is left to the caller; this module only
//! converts to and from JSON text and validates.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::SerialParams;
use crate::field::{ConsumerSet, DecodeError, Slots};
use crate::protocol::{validate_definitions, PresetCommand, ProtocolDefinition, ProtocolError};
use crate::timing::{DEFAULT_FRAME_GAP, MAX_FRAME_GAP, MIN_FRAME_GAP};
use crate::traffic::DisplayStyle;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid protocol or preset: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid field: {0}")]
    Field(#[from] DecodeError),

    #[error("Frame gap {0} ms outside 10-5000 ms")]
    InvalidFrameGap(u64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_frame_gap_ms() -> u64 {
    DEFAULT_FRAME_GAP.as_millis() as u64
}

fn default_consumers() -> ConsumerSet {
    ConsumerSet::builtin()
}

/// Complete monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Connection parameters used by `connect` when none are given
    #[serde(default)]
    pub serial: SerialParams,

    /// Silence that separates two traffic display units
    #[serde(default = "default_frame_gap_ms")]
    pub frame_gap_ms: u64,

    /// Custom protocol definitions, in dispatch order
    #[serde(default)]
    pub protocols: Vec<ProtocolDefinition>,

    /// Curves, displays, bit windows and the received clock
    #[serde(default = "default_consumers")]
    pub consumers: ConsumerSet,

    /// Saved commands
    #[serde(default)]
    pub presets: Slots<PresetCommand>,

    /// How traffic records are rendered
    #[serde(default)]
    pub display: DisplayStyle,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            serial: SerialParams::default(),
            frame_gap_ms: default_frame_gap_ms(),
            protocols: Vec::new(),
            consumers: default_consumers(),
            presets: Slots::default(),
            display: DisplayStyle::default(),
        }
    }
}

impl MonitorConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Frame gap as a duration
    pub fn frame_gap(&self) -> Duration {
        Duration::from_millis(self.frame_gap_ms)
    }

    /// Run every constructor-time check
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_definitions(&self.protocols)?;
        self.consumers.validate()?;

        let gap = self.frame_gap();
        if gap < MIN_FRAME_GAP || gap > MAX_FRAME_GAP {
            return Err(ConfigError::InvalidFrameGap(self.frame_gap_ms));
        }

        for (_, preset) in self.presets.iter() {
            preset.validate()?;
        }
        Ok(())
    }
}
