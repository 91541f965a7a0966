//! Checksum engine
//!
//! Five checksum variants used by framed serial devices. All functions are
//! pure and never fail; byte order on the wire is a property of the
//! [`ChecksumKind`], not of the algorithm.
//!
//! | Kind          | Poly   | Init   | Bit order | Wire order |
//! |---------------|--------|--------|-----------|------------|
//! | CRC16-CCITT   | 0x1021 | 0xFFFF | MSB first | big-endian |
//! | CRC16-XMODEM  | 0x1021 | 0x0000 | MSB first | little-endian |
//! | CRC16-Modbus  | 0xA001 | 0xFFFF | LSB first | little-endian |
//! | Sum8          | -      | 0      | -         | 1 byte |
//! | Xor8          | -      | 0      | -         | 1 byte |

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::protocol::FrameAnomaly;

/// Checksum appended to the end of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// No checksum
    #[default]
    None,
    /// CRC16-CCITT (init 0xFFFF), high byte first
    Crc16Ccitt,
    /// CRC16-XMODEM (init 0x0000), low byte first
    Crc16Xmodem,
    /// CRC16-Modbus (reflected 0xA001, init 0xFFFF), low byte first
    Crc16Modbus,
    /// Arithmetic sum truncated to 8 bits
    Sum8,
    /// XOR of all bytes
    Xor8,
}

impl ChecksumKind {
    /// Number of trailing bytes the checksum occupies
    pub fn byte_len(&self) -> usize {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc16Ccitt | ChecksumKind::Crc16Xmodem | ChecksumKind::Crc16Modbus => 2,
            ChecksumKind::Sum8 | ChecksumKind::Xor8 => 1,
        }
    }

    /// Compute the checksum value over `data`
    pub fn compute(&self, data: &[u8]) -> u16 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc16Ccitt => crc16_ccitt(data),
            ChecksumKind::Crc16Xmodem => crc16_xmodem(data),
            ChecksumKind::Crc16Modbus => crc16_modbus(data),
            ChecksumKind::Sum8 => sum8(data) as u16,
            ChecksumKind::Xor8 => xor8(data) as u16,
        }
    }

    /// Checksum bytes for `data`, in wire order
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let value = self.compute(data);
        let mut out = vec![0u8; self.byte_len()];
        match self {
            ChecksumKind::None => {}
            ChecksumKind::Crc16Ccitt => BigEndian::write_u16(&mut out, value),
            ChecksumKind::Crc16Xmodem | ChecksumKind::Crc16Modbus => {
                LittleEndian::write_u16(&mut out, value)
            }
            ChecksumKind::Sum8 | ChecksumKind::Xor8 => out[0] = value as u8,
        }
        out
    }

    /// Append the checksum of the current contents to `data`
    pub fn append(&self, data: &mut Vec<u8>) {
        let trailer = self.encode(data);
        data.extend_from_slice(&trailer);
    }

    /// Read the trailing checksum of `frame` in wire order
    fn read_trailer(&self, trailer: &[u8]) -> u16 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc16Ccitt => BigEndian::read_u16(trailer),
            ChecksumKind::Crc16Xmodem | ChecksumKind::Crc16Modbus => {
                LittleEndian::read_u16(trailer)
            }
            ChecksumKind::Sum8 | ChecksumKind::Xor8 => trailer[0] as u16,
        }
    }

    /// Verify a complete frame whose last [`byte_len`](Self::byte_len) bytes
    /// carry the checksum of everything before them.
    pub fn verify(&self, frame: &[u8]) -> Result<(), FrameAnomaly> {
        let n = self.byte_len();
        if n == 0 {
            return Ok(());
        }
        // At least one payload byte must precede the checksum
        if frame.len() <= n {
            return Err(FrameAnomaly::InsufficientData {
                needed: n + 1,
                available: frame.len(),
            });
        }

        let (payload, trailer) = frame.split_at(frame.len() - n);
        let expected = self.compute(payload);
        let actual = self.read_trailer(trailer);
        if expected == actual {
            Ok(())
        } else {
            Err(FrameAnomaly::ChecksumMismatch { expected, actual })
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            ChecksumKind::None => "None",
            ChecksumKind::Crc16Ccitt => "CRC16-CCITT",
            ChecksumKind::Crc16Xmodem => "CRC16-XMODEM",
            ChecksumKind::Crc16Modbus => "CRC16-Modbus",
            ChecksumKind::Sum8 => "Sum8",
            ChecksumKind::Xor8 => "Xor8",
        }
    }
}

/// MSB-first CRC16 with polynomial 0x1021 and the given initial register
fn crc16_msb_first(data: &[u8], init: u16) -> u16 {
    let mut crc = init;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// CRC16-CCITT (polynomial 0x1021, initial value 0xFFFF)
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16_msb_first(data, 0xFFFF)
}

/// CRC16-XMODEM (polynomial 0x1021, initial value 0x0000)
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    crc16_msb_first(data, 0x0000)
}

/// CRC16-Modbus (reflected polynomial 0xA001, initial value 0xFFFF)
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Sum of all bytes, truncated to 8 bits
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// XOR of all bytes
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_standard_check_values() {
        assert_eq!(crc16_ccitt(CHECK), 0x29B1);
        assert_eq!(crc16_xmodem(CHECK), 0x31C3);
        assert_eq!(crc16_modbus(CHECK), 0x4B37);
        assert_eq!(sum8(CHECK), 0xDD);
        assert_eq!(xor8(CHECK), 0x31);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc16_ccitt(&[]), 0xFFFF);
        assert_eq!(crc16_xmodem(&[]), 0x0000);
        assert_eq!(crc16_modbus(&[]), 0xFFFF);
        assert_eq!(sum8(&[]), 0);
        assert_eq!(xor8(&[]), 0);
    }

    #[test]
    fn test_wire_order() {
        // Modbus read-holding-registers request, CRC is C5 CD on the wire
        let req = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(ChecksumKind::Crc16Modbus.encode(&req), vec![0xC5, 0xCD]);

        assert_eq!(ChecksumKind::Crc16Ccitt.encode(CHECK), vec![0x29, 0xB1]);
        assert_eq!(ChecksumKind::Crc16Xmodem.encode(CHECK), vec![0xC3, 0x31]);
        assert_eq!(ChecksumKind::Sum8.encode(CHECK), vec![0xDD]);
        assert!(ChecksumKind::None.encode(CHECK).is_empty());
    }

    #[test]
    fn test_verify_detects_corruption() {
        for kind in [
            ChecksumKind::Crc16Ccitt,
            ChecksumKind::Crc16Xmodem,
            ChecksumKind::Crc16Modbus,
            ChecksumKind::Sum8,
            ChecksumKind::Xor8,
        ] {
            let mut frame = vec![0x10, 0x20, 0x30, 0x40];
            kind.append(&mut frame);
            assert!(kind.verify(&frame).is_ok(), "{:?} should verify", kind);

            frame[1] ^= 0x01;
            assert!(
                matches!(kind.verify(&frame), Err(FrameAnomaly::ChecksumMismatch { .. })),
                "{:?} should reject corrupted frame",
                kind
            );
        }
    }

    #[test]
    fn test_verify_too_short() {
        let result = ChecksumKind::Crc16Modbus.verify(&[0x01, 0x02]);
        assert!(matches!(result, Err(FrameAnomaly::InsufficientData { .. })));
        assert!(ChecksumKind::None.verify(&[]).is_ok());
    }
}
