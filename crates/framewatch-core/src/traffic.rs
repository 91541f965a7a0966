//! Traffic log
//!
//! A bounded history of grouped received units and transmitted payloads,
//! rendered as `[HH:MM:SS.mmm] RX: A8 A8 01  [ascii]`.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::protocol::to_hex;

/// Records kept before the oldest are dropped
pub const MAX_RECORDS: usize = 1000;

/// Direction of a traffic record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Received from the device
    Rx,
    /// Sent to the device
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => f.write_str("RX"),
            Direction::Tx => f.write_str("TX"),
        }
    }
}

/// One logged unit of traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    /// Which way the bytes went
    pub direction: Direction,
    /// When the record was logged
    pub timestamp: DateTime<Local>,
    /// The bytes
    pub bytes: Vec<u8>,
}

/// Rendering options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayStyle {
    /// Show bytes as spaced hex
    pub hex: bool,
    /// Show bytes as text
    pub ascii: bool,
    /// Prefix `[HH:MM:SS.mmm]`
    pub timestamp: bool,
}

impl Default for DisplayStyle {
    fn default() -> Self {
        Self {
            hex: true,
            ascii: false,
            timestamp: true,
        }
    }
}

impl TrafficRecord {
    /// Render one display line
    pub fn render(&self, style: DisplayStyle) -> String {
        let mut line = String::new();
        if style.timestamp {
            line.push_str(&format!("[{}] ", self.timestamp.format("%H:%M:%S%.3f")));
        }
        line.push_str(&format!("{}: ", self.direction));

        if style.hex {
            line.push_str(&to_hex(&self.bytes));
        }
        if style.ascii {
            // Invalid UTF-8 sequences are dropped
            let text: String = String::from_utf8_lossy(&self.bytes)
                .chars()
                .filter(|&c| c != char::REPLACEMENT_CHARACTER)
                .collect();
            if style.hex {
                line.push_str(&format!("  [{}]", text));
            } else {
                line.push_str(&text);
            }
        }
        line
    }
}

/// Bounded traffic history
#[derive(Debug, Clone)]
pub struct TrafficLog {
    records: VecDeque<TrafficRecord>,
    capacity: usize,
}

impl Default for TrafficLog {
    fn default() -> Self {
        Self::with_capacity(MAX_RECORDS)
    }
}

impl TrafficLog {
    /// Log holding at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a record stamped with the current time
    pub fn push(&mut self, direction: Direction, bytes: Vec<u8>) -> &TrafficRecord {
        self.push_at(direction, bytes, Local::now())
    }

    /// Append a record
    pub fn push_at(
        &mut self,
        direction: Direction,
        bytes: Vec<u8>,
        timestamp: DateTime<Local>,
    ) -> &TrafficRecord {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(TrafficRecord {
            direction,
            timestamp,
            bytes,
        });
        &self.records[self.records.len() - 1]
    }

    /// Records, oldest first
    pub fn records(&self) -> impl Iterator<Item = &TrafficRecord> {
        self.records.iter()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all records
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
