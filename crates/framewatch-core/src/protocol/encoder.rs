//! Outgoing Command Encoding
//!
//! Builds the byte payloads written to the device: manual sends, preset
//! commands and the time-calibration command.
//!
//! Build order for a text command:
//! 1. Text to bytes (hex digits, or UTF-8 text)
//! 2. Optional `%Y%m%d%H%M%S` ASCII timestamp prefix
//! 3. Optional data fill (bytes 1 and 2, high byte first)
//! 4. Trailing checksum in its wire order

use std::time::Duration;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use super::ProtocolError;
use crate::checksum::ChecksumKind;

/// Shortest allowed send period in seconds
pub const MIN_PERIOD_S: f64 = 0.001;

/// Longest allowed send period in seconds
pub const MAX_PERIOD_S: f64 = 3600.0;

/// Append `kind`'s checksum to `payload` in wire order
pub fn append_checksum(mut payload: Vec<u8>, kind: ChecksumKind) -> Vec<u8> {
    kind.append(&mut payload);
    payload
}

/// Parse a hex string, ignoring all whitespace
pub fn parse_hex(text: &str) -> Result<Vec<u8>, ProtocolError> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(ProtocolError::InvalidHex(text.to_string()));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let high = hex_digit(pair[0]);
            let low = hex_digit(pair[1]);
            match (high, low) {
                (Some(h), Some(l)) => Ok((h << 4) | l),
                _ => Err(ProtocolError::InvalidHex(text.to_string())),
            }
        })
        .collect()
}

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Convert text to bytes, either as hex digits or as UTF-8
pub fn text_to_bytes(text: &str, is_hex: bool) -> Result<Vec<u8>, ProtocolError> {
    if is_hex {
        parse_hex(text)
    } else {
        Ok(text.as_bytes().to_vec())
    }
}

/// ASCII `YYYYMMDDhhmmss` timestamp prefix
pub fn timestamp_prefix<Tz: TimeZone>(now: &DateTime<Tz>) -> Vec<u8>
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d%H%M%S").to_string().into_bytes()
}

/// Build a manual send payload
pub fn build_payload<Tz: TimeZone>(
    text: &str,
    is_hex: bool,
    timestamp: Option<&DateTime<Tz>>,
    checksum: ChecksumKind,
) -> Result<Vec<u8>, ProtocolError>
where
    Tz::Offset: std::fmt::Display,
{
    let body = text_to_bytes(text, is_hex)?;
    let mut data = match timestamp {
        Some(now) => timestamp_prefix(now),
        None => Vec::new(),
    };
    data.extend_from_slice(&body);
    Ok(append_checksum(data, checksum))
}

/// Pack a value in 0..=99 as two BCD digits
pub fn to_bcd(value: u8) -> u8 {
    (((value / 10) & 0x0F) << 4) | ((value % 10) & 0x0F)
}

/// The device time-calibration command
pub struct TimeCalibration;

impl TimeCalibration {
    /// Fixed command prefix
    pub const PREFIX: [u8; 5] = [0x06, 0x00, 0x10, 0x24, 0x08];

    /// Total encoded length
    pub const LENGTH: usize = 13;

    /// Encode `now`: prefix, BCD yy mm dd hh mm ss, CRC16-XMODEM low then high
    pub fn encode<Tz: TimeZone>(now: &DateTime<Tz>) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::LENGTH);
        data.extend_from_slice(&Self::PREFIX);
        data.extend_from_slice(&[
            to_bcd((now.year().rem_euclid(100)) as u8),
            to_bcd(now.month() as u8),
            to_bcd(now.day() as u8),
            to_bcd(now.hour() as u8),
            to_bcd(now.minute() as u8),
            to_bcd(now.second().min(59) as u8),
        ]);
        append_checksum(data, ChecksumKind::Crc16Xmodem)
    }
}

/// Replace bytes 1 and 2 of a command with a 16-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFill {
    /// Smallest accepted value
    pub min: u16,
    /// Largest accepted value
    pub max: u16,
    /// Current value
    pub value: u16,
}

impl Default for DataFill {
    fn default() -> Self {
        Self {
            min: 0,
            max: u16::MAX,
            value: 0,
        }
    }
}

impl DataFill {
    /// Write the value into `data`, high byte first
    pub fn apply(&self, data: &mut [u8]) -> Result<(), ProtocolError> {
        if self.value < self.min || self.value > self.max {
            return Err(ProtocolError::FillOutOfRange {
                value: self.value,
                min: self.min,
                max: self.max,
            });
        }
        if data.len() < 3 {
            return Err(ProtocolError::PayloadTooShort {
                needed: 3,
                actual: data.len(),
            });
        }
        data[1] = (self.value >> 8) as u8;
        data[2] = self.value as u8;
        Ok(())
    }
}

fn default_period() -> f64 {
    1.0
}

/// A saved command that can be sent once or periodically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetCommand {
    /// Button label
    pub name: String,
    /// Command text (hex digits when `is_hex`)
    pub command: String,
    /// Treat `command` as hex digits
    #[serde(default)]
    pub is_hex: bool,
    /// Prepend the send time as `YYYYMMDDhhmmss`
    #[serde(default)]
    pub add_timestamp: bool,
    /// Checksum appended after fill
    #[serde(default)]
    pub checksum: ChecksumKind,
    /// Send repeatedly every `period_s`
    #[serde(default)]
    pub periodic: bool,
    /// Send period in seconds
    #[serde(default = "default_period")]
    pub period_s: f64,
    /// Data fill applied before the checksum
    #[serde(default)]
    pub fill: Option<DataFill>,
}

impl PresetCommand {
    /// A one-shot command with no checksum
    pub fn new(name: impl Into<String>, command: impl Into<String>, is_hex: bool) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            is_hex,
            add_timestamp: false,
            checksum: ChecksumKind::None,
            periodic: false,
            period_s: default_period(),
            fill: None,
        }
    }

    /// Check the command text and period
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.is_hex {
            parse_hex(&self.command)?;
        }
        if !(MIN_PERIOD_S..=MAX_PERIOD_S).contains(&self.period_s) {
            return Err(ProtocolError::InvalidPeriod(self.period_s));
        }
        Ok(())
    }

    /// Send period rounded to whole milliseconds
    pub fn period(&self) -> Duration {
        let seconds = self.period_s.clamp(MIN_PERIOD_S, MAX_PERIOD_S);
        Duration::from_millis((seconds * 1000.0).round() as u64)
    }

    /// Build the bytes to send at `now`
    pub fn build<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<Vec<u8>, ProtocolError>
    where
        Tz::Offset: std::fmt::Display,
    {
        let mut data = if self.add_timestamp {
            timestamp_prefix(now)
        } else {
            Vec::new()
        };
        data.extend_from_slice(&text_to_bytes(&self.command, self.is_hex)?);

        if let Some(fill) = &self.fill {
            fill.apply(&mut data)?;
        }

        Ok(append_checksum(data, self.checksum))
    }

    /// Build the bytes to send now
    pub fn build_now(&self) -> Result<Vec<u8>, ProtocolError> {
        self.build(&Local::now())
    }
}
