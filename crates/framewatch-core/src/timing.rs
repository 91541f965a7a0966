//! Inter-frame timing grouper
//!
//! Groups received chunks into display units by silence on the line: a gap of
//! at least the threshold since the last byte starts a new unit. This is
//! presentation bookkeeping only and has no effect on protocol framing.

use std::time::{Duration, Instant};

/// Default silence threshold between display units
pub const DEFAULT_FRAME_GAP: Duration = Duration::from_millis(100);

/// Smallest accepted threshold
pub const MIN_FRAME_GAP: Duration = Duration::from_millis(10);

/// Largest accepted threshold
pub const MAX_FRAME_GAP: Duration = Duration::from_millis(5000);

/// Tick of the flush watchdog
pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(50);

/// Accumulates chunks until the line goes quiet
#[derive(Debug, Clone)]
pub struct FrameTimingGrouper {
    buffer: Vec<u8>,
    last_rx: Option<Instant>,
    gap: Duration,
}

impl Default for FrameTimingGrouper {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_GAP)
    }
}

impl FrameTimingGrouper {
    /// Grouper with the given threshold (clamped to 10-5000 ms)
    pub fn new(gap: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            last_rx: None,
            gap: gap.clamp(MIN_FRAME_GAP, MAX_FRAME_GAP),
        }
    }

    /// Current threshold
    pub fn gap(&self) -> Duration {
        self.gap
    }

    /// Change the threshold (clamped to 10-5000 ms)
    pub fn set_gap(&mut self, gap: Duration) {
        self.gap = gap.clamp(MIN_FRAME_GAP, MAX_FRAME_GAP);
    }

    /// Bytes waiting to be flushed
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Add a received chunk. Returns the previous unit if this chunk starts
    /// a new one.
    pub fn on_chunk(&mut self, chunk: &[u8], now: Instant) -> Option<Vec<u8>> {
        let starts_new = match self.last_rx {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.gap,
        };
        self.last_rx = Some(now);

        let flushed = if starts_new { self.take() } else { None };
        self.buffer.extend_from_slice(chunk);
        flushed
    }

    /// Watchdog tick: flush once the line has been quiet for the threshold
    pub fn on_watchdog(&mut self, now: Instant) -> Option<Vec<u8>> {
        let last = self.last_rx?;
        if self.buffer.is_empty() || now.saturating_duration_since(last) < self.gap {
            return None;
        }
        self.last_rx = None;
        self.take()
    }

    /// Flush unconditionally, e.g. on disconnect
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        self.last_rx = None;
        self.take()
    }

    fn take(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
