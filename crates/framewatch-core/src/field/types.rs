//! Field descriptors and extraction
//!
//! A [`FieldDescriptor`] locates one value inside a frame and scales it:
//! `value = raw * coefficient / divisor + offset`. Strings and bit fields are
//! returned without scaling.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::{DecodeError, Value};
use crate::protocol::DEFAULT_PROTOCOL_NAME;

/// Scalar type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8,
    /// Signed 8-bit integer
    I8,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 32-bit integer
    I32,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// ASCII text of the field's width
    Ascii,
}

/// Byte order of a multi-byte field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

impl DataType {
    /// Parse a type label such as `uint16 (LE)`, `int8` or `string (ASCII)`.
    ///
    /// Labels without a byte order default to little-endian.
    pub fn from_label(label: &str) -> Option<(Self, Endianness)> {
        let label = label.trim().to_lowercase();
        let (base, endian) = match label.split_once('(') {
            Some((base, rest)) => {
                let endian = match rest.trim_end_matches(')').trim() {
                    "le" => Endianness::Little,
                    "be" => Endianness::Big,
                    "ascii" => Endianness::Little,
                    _ => return None,
                };
                (base.trim().to_string(), endian)
            }
            None => (label, Endianness::Little),
        };

        let data_type = match base.as_str() {
            "uint8" | "u8" => DataType::U8,
            "int8" | "i8" => DataType::I8,
            "uint16" | "u16" => DataType::U16,
            "int16" | "i16" => DataType::I16,
            "uint32" | "u32" => DataType::U32,
            "int32" | "i32" => DataType::I32,
            "float" | "f32" => DataType::F32,
            "double" | "f64" => DataType::F64,
            "string" | "ascii" => DataType::Ascii,
            _ => return None,
        };
        Some((data_type, endian))
    }

    /// Size in bytes, 0 for variable-width text
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
            DataType::Ascii => 0,
        }
    }

    /// Read a raw numeric value at the start of `bytes`
    fn read_raw(&self, bytes: &[u8], endian: Endianness) -> f64 {
        match (self, endian) {
            (DataType::U8, _) => bytes[0] as f64,
            (DataType::I8, _) => bytes[0] as i8 as f64,
            (DataType::U16, Endianness::Little) => LittleEndian::read_u16(bytes) as f64,
            (DataType::U16, Endianness::Big) => BigEndian::read_u16(bytes) as f64,
            (DataType::I16, Endianness::Little) => LittleEndian::read_i16(bytes) as f64,
            (DataType::I16, Endianness::Big) => BigEndian::read_i16(bytes) as f64,
            (DataType::U32, Endianness::Little) => LittleEndian::read_u32(bytes) as f64,
            (DataType::U32, Endianness::Big) => BigEndian::read_u32(bytes) as f64,
            (DataType::I32, Endianness::Little) => LittleEndian::read_i32(bytes) as f64,
            (DataType::I32, Endianness::Big) => BigEndian::read_i32(bytes) as f64,
            (DataType::F32, Endianness::Little) => LittleEndian::read_f32(bytes) as f64,
            (DataType::F32, Endianness::Big) => BigEndian::read_f32(bytes) as f64,
            (DataType::F64, Endianness::Little) => LittleEndian::read_f64(bytes),
            (DataType::F64, Endianness::Big) => BigEndian::read_f64(bytes),
            (DataType::Ascii, _) => 0.0,
        }
    }
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL_NAME.to_string()
}

fn one() -> f64 {
    1.0
}

/// How to decode one value out of a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Protocol whose frames carry this field
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Byte offset of the field
    pub start: usize,
    /// Bytes covered by the field
    pub width: usize,
    /// Scalar type
    pub data_type: DataType,
    /// Byte order of multi-byte types
    #[serde(default)]
    pub endianness: Endianness,
    /// Multiplier applied to the raw value
    #[serde(default = "one")]
    pub coefficient: f64,
    /// Divisor applied after the multiplier, must be > 0
    #[serde(default = "one")]
    pub divisor: f64,
    /// Added last
    #[serde(default)]
    pub offset: f64,
    /// Single-bit mode: bit 0-7 of the byte at `start`, LSB = 0
    #[serde(default)]
    pub bit_index: Option<u8>,
}

impl FieldDescriptor {
    /// Unscaled numeric field of the built-in protocol
    pub fn new(start: usize, data_type: DataType, endianness: Endianness) -> Self {
        Self {
            protocol: default_protocol(),
            start,
            width: data_type.size_bytes().max(1),
            data_type,
            endianness,
            coefficient: 1.0,
            divisor: 1.0,
            offset: 0.0,
            bit_index: None,
        }
    }

    /// Single-bit field of the built-in protocol
    pub fn bit(start: usize, bit_index: u8) -> Self {
        Self {
            bit_index: Some(bit_index),
            ..Self::new(start, DataType::U8, Endianness::Little)
        }
    }

    /// ASCII text field of the built-in protocol
    pub fn ascii(start: usize, width: usize) -> Self {
        Self {
            width,
            ..Self::new(start, DataType::Ascii, Endianness::Little)
        }
    }

    /// Attach the field to another protocol
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the affine transform
    pub fn with_scale(mut self, coefficient: f64, divisor: f64, offset: f64) -> Self {
        self.coefficient = coefficient;
        self.divisor = divisor;
        self.offset = offset;
        self
    }

    /// Whether frames of `protocol` carry this field
    pub fn matches(&self, protocol: &str) -> bool {
        self.protocol == protocol
    }

    /// Check the descriptor independently of any frame
    pub fn validate(&self) -> Result<(), DecodeError> {
        if let Some(bit) = self.bit_index {
            if bit > 7 {
                return Err(DecodeError::InvalidBitIndex(bit));
            }
            if self.width != 1 {
                return Err(DecodeError::InvalidWidth {
                    data_type: self.data_type,
                    width: self.width,
                });
            }
            return Ok(());
        }

        let size = self.data_type.size_bytes();
        let width_ok = match self.data_type {
            DataType::Ascii => self.width >= 1,
            _ => matches!(self.width, 1 | 2 | 4 | 8) && self.width >= size,
        };
        if !width_ok {
            return Err(DecodeError::InvalidWidth {
                data_type: self.data_type,
                width: self.width,
            });
        }

        if !(self.divisor > 0.0) {
            return Err(DecodeError::InvalidDivisor(self.divisor));
        }
        Ok(())
    }

    /// Decode this field from `frame`
    pub fn extract(&self, frame: &[u8]) -> Result<Value, DecodeError> {
        self.validate()?;

        let end = self
            .start
            .checked_add(self.width)
            .filter(|&end| end <= frame.len())
            .ok_or(DecodeError::OutOfBounds {
                start: self.start,
                width: self.width,
                len: frame.len(),
            })?;
        let bytes = &frame[self.start..end];

        if let Some(bit) = self.bit_index {
            return Ok(Value::Scalar(((bytes[0] >> bit) & 1) as f64));
        }

        if self.data_type == DataType::Ascii {
            let text = match bytes.iter().rposition(|&b| b != 0) {
                Some(last) => &bytes[..=last],
                None => &[][..],
            };
            return Ok(Value::String(decode_ascii(text)));
        }

        let raw = self.data_type.read_raw(bytes, self.endianness);
        Ok(Value::Scalar(raw * self.coefficient / self.divisor + self.offset))
    }
}

/// ASCII decode with U+FFFD for bytes above 0x7F
fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
        .collect()
}
