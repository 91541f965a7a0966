//! Curve recorder
//!
//! Keeps an aligned history of curve samples while recording is active. Every
//! received frame adds one row with a value per recorded curve.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::{ConsumerSet, SlotId};
use crate::protocol::Frame;

/// Maximum rows kept before the oldest are dropped
pub const MAX_POINTS: usize = 50_000;

/// One recorded row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveSample {
    /// Frame completion time
    pub timestamp: DateTime<Local>,
    /// Seconds since the first row
    pub elapsed: f64,
    /// One value per channel, in channel order
    pub values: Vec<f64>,
}

/// Aligned multi-curve history
#[derive(Debug, Clone)]
pub struct CurveRecorder {
    /// Recorded curves and their names
    channels: Vec<(SlotId, String)>,
    buffer: VecDeque<CurveSample>,
    /// Last value per channel, repeated when a frame does not carry it
    last: Vec<f64>,
    start_time: Option<DateTime<Local>>,
    is_recording: bool,
    max_points: usize,
}

impl Default for CurveRecorder {
    fn default() -> Self {
        Self::with_capacity(MAX_POINTS)
    }
}

impl CurveRecorder {
    /// Recorder with a custom row cap
    pub fn with_capacity(max_points: usize) -> Self {
        Self {
            channels: Vec::new(),
            buffer: VecDeque::new(),
            last: Vec::new(),
            start_time: None,
            is_recording: false,
            max_points: max_points.max(1),
        }
    }

    /// Start a fresh recording of every enabled curve flagged for recording
    pub fn start(&mut self, consumers: &ConsumerSet) {
        self.channels = consumers
            .curves
            .iter()
            .filter(|(_, c)| c.enabled && c.record)
            .map(|(id, c)| (id, c.name.clone()))
            .collect();
        self.last = vec![0.0; self.channels.len()];
        self.buffer.clear();
        self.start_time = None;
        self.is_recording = true;
        tracing::info!("recording started with {} curve(s)", self.channels.len());
    }

    /// Stop recording, keeping the history
    pub fn stop(&mut self) {
        if self.is_recording {
            tracing::info!("recording stopped after {} point(s)", self.buffer.len());
        }
        self.is_recording = false;
    }

    /// Check if recording is active
    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// Record one row for `frame`.
    ///
    /// Curves of another protocol repeat their previous value; curves of this
    /// protocol that fail to decode record 0.0.
    pub fn record(&mut self, consumers: &ConsumerSet, frame: &Frame) {
        if !self.is_recording {
            return;
        }

        let values: Vec<f64> = self
            .channels
            .iter()
            .zip(self.last.iter())
            .map(|((id, _), &previous)| match consumers.curves.get(*id) {
                Some(curve) if curve.field.matches(frame.protocol()) => {
                    curve.sample(frame.bytes()).unwrap_or(0.0)
                }
                _ => previous,
            })
            .collect();

        let start = *self.start_time.get_or_insert(frame.timestamp());
        let elapsed = (frame.timestamp() - start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        if self.buffer.len() >= self.max_points {
            self.buffer.pop_front();
        }
        self.last.clone_from(&values);
        self.buffer.push_back(CurveSample {
            timestamp: frame.timestamp(),
            elapsed,
            values,
        });
    }

    /// Channel ids and names in column order
    pub fn channels(&self) -> &[(SlotId, String)] {
        &self.channels
    }

    /// Recorded rows, oldest first
    pub fn samples(&self) -> impl Iterator<Item = &CurveSample> {
        self.buffer.iter()
    }

    /// Number of recorded rows
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear all recorded data
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.start_time = None;
        self.last.iter_mut().for_each(|v| *v = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{CurveConfig, DataType, Endianness, FieldDescriptor};
    use chrono::Duration;

    fn frame(protocol: &str, byte: u8, at: DateTime<Local>) -> Frame {
        Frame::new(protocol, vec![byte, byte], at)
    }

    #[test]
    fn test_recorder_alignment() {
        let mut consumers = ConsumerSet::default();
        consumers.curves.insert(CurveConfig::new(
            "a",
            "",
            FieldDescriptor::new(0, DataType::U8, Endianness::Little),
        ));
        consumers.curves.insert(CurveConfig::new(
            "b",
            "",
            FieldDescriptor::new(1, DataType::U8, Endianness::Little).with_protocol("aux"),
        ));

        let mut recorder = CurveRecorder::default();
        assert!(!recorder.is_recording());
        recorder.start(&consumers);

        let t0 = Local::now();
        recorder.record(&consumers, &frame("default", 5, t0));
        recorder.record(&consumers, &frame("aux", 7, t0 + Duration::milliseconds(500)));
        recorder.record(&consumers, &frame("default", 9, t0 + Duration::seconds(1)));

        let column = |name: &str| {
            let idx = recorder.channels().iter().position(|(_, n)| n == name).unwrap();
            recorder.samples().map(|s| s.values[idx]).collect::<Vec<_>>()
        };
        assert_eq!(column("a"), vec![5.0, 5.0, 9.0]);
        assert_eq!(column("b"), vec![0.0, 7.0, 7.0]);

        let elapsed: Vec<f64> = recorder.samples().map(|s| s.elapsed).collect();
        assert_eq!(elapsed, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_failed_decode_records_zero() {
        let mut consumers = ConsumerSet::default();
        consumers.curves.insert(CurveConfig::new(
            "far",
            "",
            FieldDescriptor::new(10, DataType::U8, Endianness::Little),
        ));
        let mut recorder = CurveRecorder::default();
        recorder.start(&consumers);
        recorder.record(&consumers, &frame("default", 1, Local::now()));
        assert_eq!(recorder.samples().next().map(|s| s.values.clone()), Some(vec![0.0]));
    }

    #[test]
    fn test_cap_drops_oldest() {
        let consumers = ConsumerSet::builtin();
        let mut recorder = CurveRecorder::with_capacity(3);
        recorder.start(&consumers);
        let t0 = Local::now();
        for i in 0..5 {
            recorder.record(&consumers, &frame("default", i, t0 + Duration::seconds(i as i64)));
        }
        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.samples().next().map(|s| s.elapsed), Some(2.0));
    }

    #[test]
    fn test_not_recording_ignores_frames() {
        let consumers = ConsumerSet::builtin();
        let mut recorder = CurveRecorder::default();
        recorder.record(&consumers, &frame("default", 1, Local::now()));
        assert!(recorder.is_empty());
    }
}
