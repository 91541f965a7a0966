//! Frame synchronizer
//!
//! Turns an unbounded byte stream into discrete validated frames for one
//! protocol definition. Each call to [`FrameSynchronizer::feed`] appends a
//! chunk to the internal buffer and extracts every complete frame it can.
//!
//! Extraction loop, while at least one frame length is buffered:
//! 1. Locate the header and discard everything before it. If the header is
//!    absent, keep only the last `header.len() - 1` bytes (a header may be
//!    split across chunks) and wait for more data. The built-in protocol
//!    clears its buffer instead.
//! 2. Slice a candidate of exactly `length` bytes.
//! 3. On tail or checksum mismatch drop `max(1, header.len())` bytes and
//!    retry immediately (resynchronization).
//! 4. Otherwise emit the frame and consume `length` bytes.
//!
//! Bounded protocols additionally cap their buffer at [`BUFFER_CAP`] bytes,
//! truncating to the most recent [`BUFFER_RETAIN`] bytes.

use chrono::{DateTime, Local};

use super::{Frame, FrameAnomaly, ProtocolDefinition};

/// Hard cap on buffered bytes for bounded protocols
pub const BUFFER_CAP: usize = 10_240;

/// Bytes kept when a bounded buffer overflows
pub const BUFFER_RETAIN: usize = 5_120;

/// Counters describing what a synchronizer has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames emitted
    pub frames: u64,
    /// Times the header could not be found in a full buffer
    pub header_misses: u64,
    /// Candidates rejected for a wrong tail
    pub tail_mismatches: u64,
    /// Candidates rejected for a wrong checksum
    pub checksum_mismatches: u64,
    /// Bytes discarded by resynchronization, header search or overflow
    pub discarded_bytes: u64,
}

/// Stateful per-protocol frame extractor
#[derive(Debug, Clone)]
pub struct FrameSynchronizer {
    definition: ProtocolDefinition,
    buffer: Vec<u8>,
    bounded: bool,
    stats: SyncStats,
    last_anomaly: Option<FrameAnomaly>,
}

impl FrameSynchronizer {
    /// Synchronizer for a custom (bounded) protocol
    pub fn new(definition: ProtocolDefinition) -> Self {
        Self {
            definition,
            buffer: Vec::new(),
            bounded: true,
            stats: SyncStats::default(),
            last_anomaly: None,
        }
    }

    /// Synchronizer for the built-in protocol (unbounded, clears on header miss)
    pub fn builtin() -> Self {
        Self {
            bounded: false,
            ..Self::new(ProtocolDefinition::builtin())
        }
    }

    /// The protocol this synchronizer extracts
    pub fn definition(&self) -> &ProtocolDefinition {
        &self.definition
    }

    /// Protocol name
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Counters since creation
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// The most recent anomaly, if any
    pub fn last_anomaly(&self) -> Option<FrameAnomaly> {
        self.last_anomaly
    }

    /// Discard all buffered bytes
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed a chunk, stamping emitted frames with the current time
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.feed_at(chunk, Local::now())
    }

    /// Feed a chunk, stamping emitted frames with `timestamp`
    pub fn feed_at(&mut self, chunk: &[u8], timestamp: DateTime<Local>) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let length = self.definition.length;
        let header_len = self.definition.header.len();
        let skip = header_len.max(1);

        while self.buffer.len() >= length {
            if header_len > 0 {
                match find_subsequence(&self.buffer, &self.definition.header) {
                    Some(index) => self.discard(index),
                    None => {
                        self.note(FrameAnomaly::HeaderNotFound);
                        self.stats.header_misses += 1;
                        if self.bounded {
                            let keep = header_len - 1;
                            self.discard(self.buffer.len() - keep);
                        } else {
                            let all = self.buffer.len();
                            self.discard(all);
                        }
                        break;
                    }
                }

                if self.buffer.len() < length {
                    self.note(FrameAnomaly::InsufficientData {
                        needed: length,
                        available: self.buffer.len(),
                    });
                    break;
                }
            }

            let candidate = &self.buffer[..length];

            if !self.definition.tail.is_empty() && !candidate.ends_with(&self.definition.tail) {
                self.note(FrameAnomaly::TailMismatch);
                self.stats.tail_mismatches += 1;
                self.discard(skip);
                continue;
            }

            if let Err(anomaly) = self.definition.checksum.verify(candidate) {
                tracing::warn!(
                    protocol = %self.definition.name,
                    "{}; dropping frame: {}",
                    anomaly,
                    super::frame::to_hex(candidate)
                );
                self.note(anomaly);
                self.stats.checksum_mismatches += 1;
                self.discard(skip);
                continue;
            }

            let bytes: Vec<u8> = self.buffer.drain(..length).collect();
            frames.push(Frame::new(self.definition.name.clone(), bytes, timestamp));
            self.stats.frames += 1;
        }

        if self.bounded && self.buffer.len() > BUFFER_CAP {
            let excess = self.buffer.len() - BUFFER_RETAIN;
            tracing::debug!(
                protocol = %self.definition.name,
                "buffer overflow, dropping {} bytes",
                excess
            );
            self.discard(excess);
        }

        frames
    }

    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.buffer.drain(..count);
        self.stats.discarded_bytes += count as u64;
    }

    fn note(&mut self, anomaly: FrameAnomaly) {
        self.last_anomaly = Some(anomaly);
    }
}

/// Position of the first occurrence of `needle` in `haystack`
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumKind;
    use pretty_assertions::assert_eq;

    fn modbus_protocol() -> ProtocolDefinition {
        ProtocolDefinition::new("mb", vec![0x55, 0xAA], vec![], 8, ChecksumKind::Crc16Modbus).unwrap()
    }

    fn modbus_frame(payload: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![0x55, 0xAA];
        frame.extend_from_slice(&payload);
        ChecksumKind::Crc16Modbus.append(&mut frame);
        frame
    }

    fn default_frame(seed: u8) -> Vec<u8> {
        let mut frame = vec![seed; 38];
        frame[0] = 0xA8;
        frame[1] = 0xA8;
        frame[36] = 0xAA;
        frame[37] = 0xAA;
        frame
    }

    #[test]
    fn test_find_subsequence() {
        assert_eq!(find_subsequence(&[1, 2, 3, 4], &[3, 4]), Some(2));
        assert_eq!(find_subsequence(&[1, 2, 3], &[4]), None);
        assert_eq!(find_subsequence(&[1], &[1, 2]), None);
    }

    #[test]
    fn test_single_frame() {
        let mut sync = FrameSynchronizer::new(modbus_protocol());
        let frame = modbus_frame([1, 2, 3, 4]);
        let out = sync.feed(&frame);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes(), frame.as_slice());
        assert_eq!(out[0].protocol(), "mb");
        assert_eq!(sync.buffered(), 0);
    }

    #[test]
    fn test_leading_garbage_discarded() {
        let mut sync = FrameSynchronizer::new(modbus_protocol());
        let mut stream = vec![0x00, 0x13, 0x55];
        let frame = modbus_frame([9, 9, 9, 9]);
        stream.extend_from_slice(&frame);
        let out = sync.feed(&stream);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes(), frame.as_slice());
        assert_eq!(sync.stats().discarded_bytes, 3);
    }

    #[test]
    fn test_header_split_across_chunks() {
        let mut sync = FrameSynchronizer::new(modbus_protocol());
        // Eight bytes of noise ending with the first header byte
        let noise = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x55];
        assert!(sync.feed(&noise).is_empty());
        assert_eq!(sync.buffered(), 1);
        assert_eq!(sync.last_anomaly(), Some(FrameAnomaly::HeaderNotFound));

        let frame = modbus_frame([1, 1, 2, 2]);
        let out = sync.feed(&frame[1..]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes(), frame.as_slice());
    }

    #[test]
    fn test_builtin_clears_on_header_miss() {
        let mut sync = FrameSynchronizer::builtin();
        let mut noise = vec![0x11; 40];
        noise[39] = 0xA8;
        assert!(sync.feed(&noise).is_empty());
        assert_eq!(sync.buffered(), 0);
    }

    #[test]
    fn test_builtin_tail_mismatch_resyncs() {
        let mut sync = FrameSynchronizer::builtin();
        let mut bad = default_frame(0x01);
        bad[37] = 0x00;
        let good = default_frame(0x02);

        let mut stream = bad.clone();
        stream.extend_from_slice(&good);
        let out = sync.feed(&stream);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes(), good.as_slice());
        assert_eq!(sync.stats().tail_mismatches, 1);
    }

    #[test]
    fn test_checksum_mismatch_resyncs() {
        let mut sync = FrameSynchronizer::new(modbus_protocol());
        let first = modbus_frame([1, 2, 3, 4]);
        let mut corrupt = modbus_frame([5, 6, 7, 8]);
        corrupt[3] ^= 0xFF;
        let last = modbus_frame([9, 10, 11, 12]);

        let stream = [first.clone(), corrupt, last.clone()].concat();
        let out = sync.feed(&stream);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].bytes(), first.as_slice());
        assert_eq!(out[1].bytes(), last.as_slice());
        assert_eq!(sync.stats().checksum_mismatches, 1);
    }

    #[test]
    fn test_headerless_protocol_slices_fixed_length() {
        let def = ProtocolDefinition::new("raw", vec![], vec![], 3, ChecksumKind::Sum8).unwrap();
        let mut sync = FrameSynchronizer::new(def);
        // [1, 2, 3] valid, [1, 1, 9] invalid -> drop one byte at a time
        let out = sync.feed(&[1, 2, 3, 1, 1, 9, 4, 5, 9]);
        let got: Vec<&[u8]> = out.iter().map(|f| f.bytes()).collect();
        assert_eq!(got, vec![&[1u8, 2, 3][..], &[4u8, 5, 9][..]]);
    }

    #[test]
    fn test_bounded_buffer_overflow_truncates() {
        // Frame longer than the cap so the loop never consumes anything
        let def = ProtocolDefinition::new("huge", vec![], vec![], 20_000, ChecksumKind::None).unwrap();
        let mut sync = FrameSynchronizer::new(def);
        sync.feed(&vec![0u8; BUFFER_CAP + 1]);
        assert_eq!(sync.buffered(), BUFFER_RETAIN);
    }

    #[test]
    fn test_many_frames_in_one_chunk_survive_cap() {
        let mut sync = FrameSynchronizer::new(modbus_protocol());
        let stream: Vec<u8> = (0..2000u16)
            .flat_map(|i| modbus_frame([(i >> 8) as u8, i as u8, 0, 0]))
            .collect();
        assert!(stream.len() > BUFFER_CAP);
        assert_eq!(sync.feed(&stream).len(), 2000);
    }
}
