//! Field consumers
//!
//! Curves, scalar displays, bit-status windows and the received-clock decoder
//! all read values out of frames. Each kind lives in an id-keyed [`Slots`]
//! collection so edits keep the slot's identity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DataType, DecodeError, Endianness, FieldDescriptor, Value};
use crate::protocol::{Frame, DEFAULT_PROTOCOL_NAME};

/// Stable identifier of a consumer or preset slot
pub type SlotId = Uuid;

/// Id-keyed collection of consumer configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slots<T> {
    entries: BTreeMap<SlotId, T>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> Slots<T> {
    /// Store a new entry under a fresh id
    pub fn insert(&mut self, value: T) -> SlotId {
        let id = Uuid::new_v4();
        self.entries.insert(id, value);
        id
    }

    /// Replace an existing entry, keeping its id. Unknown ids are ignored.
    pub fn replace(&mut self, id: SlotId, value: T) -> Option<T> {
        self.entries
            .get_mut(&id)
            .map(|slot| std::mem::replace(slot, value))
    }

    /// Remove an entry
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        self.entries.remove(&id)
    }

    /// Look up an entry
    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.entries.get(&id)
    }

    /// Iterate in id order
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn enabled() -> bool {
    true
}

/// A plotted value series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveConfig {
    /// Series name
    pub name: String,
    /// Unit label
    #[serde(default)]
    pub unit: String,
    /// Where the value comes from
    pub field: FieldDescriptor,
    /// Whether the curve is plotted
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Whether samples are kept by the recorder
    #[serde(default = "enabled")]
    pub record: bool,
}

impl CurveConfig {
    /// Enabled, recorded curve
    pub fn new(name: impl Into<String>, unit: impl Into<String>, field: FieldDescriptor) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            field,
            enabled: true,
            record: true,
        }
    }

    /// Numeric sample from a frame; text fields never produce samples
    pub fn sample(&self, frame: &[u8]) -> Option<f64> {
        self.field.extract(frame).ok().and_then(|v| v.as_scalar())
    }
}

fn default_decimals() -> usize {
    2
}

/// A single-value readout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Label
    pub name: String,
    /// Unit label
    #[serde(default)]
    pub unit: String,
    /// Decimal places for numeric values
    #[serde(default = "default_decimals")]
    pub decimals: usize,
    /// Where the value comes from
    pub field: FieldDescriptor,
    /// Whether the display is updated
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl DisplayConfig {
    /// Render `<name>: <value> <unit>`
    pub fn format(&self, value: &Value) -> String {
        let text = value.format(self.decimals);
        if self.unit.is_empty() {
            format!("{}: {}", self.name, text)
        } else {
            format!("{}: {} {}", self.name, text, self.unit)
        }
    }
}

fn default_target_byte() -> usize {
    17
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL_NAME.to_string()
}

/// Eight named status bits of one byte
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitWindowConfig {
    /// Window title
    pub name: String,
    /// Protocol whose frames carry the byte
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Byte offset inside the frame
    #[serde(default = "default_target_byte")]
    pub target_byte: usize,
    /// Names of bits 0 (LSB) through 7
    #[serde(default)]
    pub bit_names: [String; 8],
    /// Whether the window is updated
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl BitWindowConfig {
    /// Bits of the target byte, LSB first. `None` if the frame is too short.
    pub fn decode(&self, frame: &[u8]) -> Option<[bool; 8]> {
        let byte = *frame.get(self.target_byte)?;
        Some(std::array::from_fn(|bit| (byte >> bit) & 1 == 1))
    }
}

/// Device clock carried inside frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Protocol whose frames carry the clock
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Offset of the year field
    pub year_start: usize,
    /// Width of the year field
    pub year_width: usize,
    /// Year encoding (`U8` or `U16`)
    pub year_type: DataType,
    /// Year byte order
    #[serde(default)]
    pub year_endianness: Endianness,
    /// Month byte offset
    pub month_start: usize,
    /// Day byte offset
    pub day_start: usize,
    /// Hour byte offset
    pub hour_start: usize,
    /// Minute byte offset
    pub minute_start: usize,
    /// Second byte offset
    pub second_start: usize,
    /// Whether the clock is decoded
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            year_start: 10,
            year_width: 2,
            year_type: DataType::U16,
            year_endianness: Endianness::Little,
            month_start: 12,
            day_start: 13,
            hour_start: 14,
            minute_start: 15,
            second_start: 16,
            enabled: true,
        }
    }
}

impl ClockConfig {
    /// Decode the clock fields from a frame
    pub fn decode(&self, frame: &[u8]) -> Result<ReceivedClock, DecodeError> {
        let year_field = FieldDescriptor {
            width: self.year_width,
            ..FieldDescriptor::new(self.year_start, self.year_type, self.year_endianness)
        };
        let year = year_field
            .extract(frame)?
            .as_scalar()
            .ok_or(DecodeError::InvalidWidth {
                data_type: self.year_type,
                width: self.year_width,
            })?;

        let byte_at = |start: usize| {
            frame.get(start).copied().ok_or(DecodeError::OutOfBounds {
                start,
                width: 1,
                len: frame.len(),
            })
        };

        Ok(ReceivedClock {
            year: year as u32,
            month: byte_at(self.month_start)?,
            day: byte_at(self.day_start)?,
            hour: byte_at(self.hour_start)?,
            minute: byte_at(self.minute_start)?,
            second: byte_at(self.second_start)?,
        })
    }
}

/// Clock value reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ReceivedClock {
    pub year: u32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for ReceivedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}/{:02}/{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// A consumer's new value after a frame
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerUpdate {
    /// New curve sample
    Curve {
        /// Curve slot
        id: SlotId,
        /// Scaled value
        value: f64,
    },
    /// New display value and its rendered text
    Display {
        /// Display slot
        id: SlotId,
        /// Decoded value
        value: Value,
        /// Rendered readout
        text: String,
    },
    /// New bit states, LSB first
    BitWindow {
        /// Window slot
        id: SlotId,
        /// Bits 0-7
        bits: [bool; 8],
    },
    /// New device clock
    Clock(ReceivedClock),
}

/// All configured consumers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSet {
    /// Plotted series
    #[serde(default)]
    pub curves: Slots<CurveConfig>,
    /// Single-value readouts
    #[serde(default)]
    pub displays: Slots<DisplayConfig>,
    /// Bit-status windows
    #[serde(default)]
    pub bit_windows: Slots<BitWindowConfig>,
    /// Received-clock decoder
    #[serde(default)]
    pub clock: Option<ClockConfig>,
}

impl ConsumerSet {
    /// The three curves of the built-in protocol
    pub fn builtin() -> Self {
        let mut set = Self::default();
        set.curves.insert(CurveConfig::new(
            "CO",
            "ppm",
            FieldDescriptor::new(2, DataType::U16, Endianness::Little),
        ));
        set.curves.insert(CurveConfig::new(
            "Average CO",
            "ppm",
            FieldDescriptor::new(4, DataType::U32, Endianness::Little).with_scale(1.0, 600.0, 0.0),
        ));
        set.curves.insert(CurveConfig::new(
            "Temperature",
            "°C",
            FieldDescriptor::new(8, DataType::I16, Endianness::Little).with_scale(1.0, 10.0, 0.0),
        ));
        set
    }

    /// Check every field descriptor
    pub fn validate(&self) -> Result<(), DecodeError> {
        for (_, curve) in self.curves.iter() {
            curve.field.validate()?;
        }
        for (_, display) in self.displays.iter() {
            display.field.validate()?;
        }
        Ok(())
    }

    /// Decode every enabled consumer whose protocol matches the frame.
    ///
    /// Decode failures yield no update for that consumer.
    pub fn apply(&self, frame: &Frame) -> Vec<ConsumerUpdate> {
        let protocol = frame.protocol();
        let bytes = frame.bytes();
        let mut updates = Vec::new();

        for (id, curve) in self.curves.iter() {
            if !curve.enabled || !curve.field.matches(protocol) {
                continue;
            }
            if let Some(value) = curve.sample(bytes) {
                updates.push(ConsumerUpdate::Curve { id, value });
            }
        }

        for (id, readout) in self.displays.iter() {
            if !readout.enabled || !readout.field.matches(protocol) {
                continue;
            }
            match readout.field.extract(bytes) {
                Ok(value) => {
                    let text = readout.format(&value);
                    updates.push(ConsumerUpdate::Display { id, value, text });
                }
                Err(e) => tracing::trace!("display '{}' not updated: {}", readout.name, e),
            }
        }

        for (id, window) in self.bit_windows.iter() {
            if !window.enabled || window.protocol != protocol {
                continue;
            }
            if let Some(bits) = window.decode(bytes) {
                updates.push(ConsumerUpdate::BitWindow { id, bits });
            }
        }

        if let Some(clock) = self.clock.as_ref().filter(|c| c.enabled && c.protocol == protocol) {
            match clock.decode(bytes) {
                Ok(value) => updates.push(ConsumerUpdate::Clock(value)),
                Err(e) => tracing::trace!("received clock not updated: {}", e),
            }
        }

        updates
    }
}
