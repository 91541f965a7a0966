//! Demo Mode - Simulated gas sensor for testing
//!
//! Generates valid built-in protocol frames without real hardware. The
//! simulated sensor reports a CO concentration wandering around a baseline
//! with occasional spikes, its running average and a slowly drifting
//! temperature, plus the device clock and a status byte.

use std::time::{Duration, Instant};

use chrono::{Datelike, Local, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::device::{ByteSource, DeviceError, SerialParams};
use crate::protocol::{DEFAULT_FRAME_LENGTH, DEFAULT_HEADER, DEFAULT_TAIL};

/// Device name the demo source answers to
pub const DEMO_PORT: &str = "DEMO";

/// Default time between demo frames
pub const DEMO_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Status bit set while the sensor is healthy
pub const STATUS_SENSOR_OK: u8 = 0x01;

/// Status bit set while CO is above the alarm threshold
pub const STATUS_ALARM: u8 = 0x02;

const BASELINE_PPM: f64 = 35.0;
const ALARM_PPM: f64 = 200.0;

/// Simulated sensor producing built-in protocol frames
pub struct DemoDevice {
    /// Current CO reading (ppm)
    co_ppm: f64,
    /// Exponential running average of CO (ppm)
    co_average: f64,
    /// Current temperature (°C)
    temperature: f64,
    /// Frames left in the current spike, if any
    spike_remaining: u32,
    rng: StdRng,
}

impl Default for DemoDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoDevice {
    /// Create a new demo device
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic device for tests
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            co_ppm: BASELINE_PPM,
            co_average: BASELINE_PPM,
            temperature: 22.0,
            spike_remaining: 0,
            rng,
        }
    }

    /// Current CO reading
    pub fn co_ppm(&self) -> f64 {
        self.co_ppm
    }

    /// Current temperature
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Advance the simulation by one frame and encode it
    pub fn next_frame(&mut self) -> Vec<u8> {
        if self.spike_remaining == 0 && self.rng.gen_bool(0.01) {
            self.spike_remaining = self.rng.gen_range(10..40);
        }
        let target = if self.spike_remaining > 0 {
            self.spike_remaining -= 1;
            BASELINE_PPM + 300.0
        } else {
            BASELINE_PPM
        };

        // Move a fraction of the way to the target, plus noise
        let noise: f64 = self.rng.gen_range(-2.0..2.0);
        self.co_ppm = (self.co_ppm + (target - self.co_ppm) * 0.2 + noise).clamp(0.0, 1000.0);
        self.co_average = self.co_average * 0.95 + self.co_ppm * 0.05;
        self.temperature = (self.temperature + self.rng.gen_range(-0.05..0.05)).clamp(-20.0, 60.0);

        self.encode()
    }

    fn encode(&self) -> Vec<u8> {
        let mut frame = vec![0u8; DEFAULT_FRAME_LENGTH];
        frame[..2].copy_from_slice(&DEFAULT_HEADER);
        frame[2..4].copy_from_slice(&(self.co_ppm.round() as u16).to_le_bytes());
        frame[4..8].copy_from_slice(&((self.co_average * 600.0).round() as u32).to_le_bytes());
        frame[8..10].copy_from_slice(&((self.temperature * 10.0).round() as i16).to_le_bytes());

        let now = Local::now();
        frame[10..12].copy_from_slice(&(now.year() as u16).to_le_bytes());
        frame[12] = now.month() as u8;
        frame[13] = now.day() as u8;
        frame[14] = now.hour() as u8;
        frame[15] = now.minute() as u8;
        frame[16] = now.second() as u8;

        let mut status = STATUS_SENSOR_OK;
        if self.co_ppm > ALARM_PPM {
            status |= STATUS_ALARM;
        }
        frame[17] = status;

        frame[DEFAULT_FRAME_LENGTH - 2..].copy_from_slice(&DEFAULT_TAIL);
        frame
    }
}

/// Byte source backed by a [`DemoDevice`].
///
/// Emits one frame per interval while open, delivered in randomly sized
/// chunks the way a real UART driver splits them.
pub struct DemoSource {
    device: DemoDevice,
    interval: Duration,
    open: bool,
    last_emit: Option<Instant>,
    pending: Vec<u8>,
    rng: StdRng,
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new(DemoDevice::new(), DEMO_FRAME_INTERVAL)
    }
}

impl DemoSource {
    /// Source emitting a frame every `interval`
    pub fn new(device: DemoDevice, interval: Duration) -> Self {
        Self {
            device,
            interval: interval.max(Duration::from_millis(1)),
            open: false,
            last_emit: None,
            pending: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }
}

impl ByteSource for DemoSource {
    fn open(&mut self, params: &SerialParams) -> Result<(), DeviceError> {
        if params.port != DEMO_PORT {
            return Err(DeviceError::PortNotFound(params.port.clone()));
        }
        self.open = true;
        self.last_emit = Some(Instant::now());
        self.pending.clear();
        tracing::info!("demo device opened");
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_available(&mut self) -> Result<Vec<u8>, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }

        let now = Instant::now();
        let last = *self.last_emit.get_or_insert(now);
        let due = (now.saturating_duration_since(last).as_millis() / self.interval.as_millis().max(1)) as u32;
        if due > 0 {
            // Cap the catch-up after a long stall
            for _ in 0..due.min(10) {
                let frame = self.device.next_frame();
                self.pending.extend_from_slice(&frame);
            }
            self.last_emit = Some(last + self.interval * due);
        }

        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let take = self.rng.gen_range(1..=self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        tracing::debug!("demo device ignoring {} byte(s)", bytes.len());
        Ok(())
    }

    fn enumerate(&self) -> Vec<String> {
        vec![DEMO_PORT.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{extract, DataType, Endianness, FieldDescriptor};
    use crate::protocol::FrameSynchronizer;

    #[test]
    fn test_frames_are_valid() {
        let mut device = DemoDevice::with_seed(7);
        let mut sync = FrameSynchronizer::builtin();
        let mut stream = Vec::new();
        for _ in 0..50 {
            stream.extend(device.next_frame());
        }
        assert_eq!(sync.feed(&stream).len(), 50);
    }

    #[test]
    fn test_fields_match_state() {
        let mut device = DemoDevice::with_seed(1);
        let frame = device.next_frame();

        let co = extract(&frame, &FieldDescriptor::new(2, DataType::U16, Endianness::Little)).unwrap();
        assert_eq!(co.as_scalar(), Some(device.co_ppm().round()));

        let temp = FieldDescriptor::new(8, DataType::I16, Endianness::Little).with_scale(1.0, 10.0, 0.0);
        let value = extract(&frame, &temp).unwrap().as_scalar().unwrap();
        assert!((value - device.temperature()).abs() < 0.051);
        assert_eq!(frame[17] & STATUS_SENSOR_OK, STATUS_SENSOR_OK);
    }

    #[test]
    fn test_source_requires_demo_port() {
        let mut source = DemoSource::default();
        assert!(matches!(
            source.open(&SerialParams::new("COM1")),
            Err(DeviceError::PortNotFound(_))
        ));
        source.open(&SerialParams::new(DEMO_PORT)).unwrap();
        assert!(source.is_open());
        assert_eq!(source.enumerate(), vec![DEMO_PORT.to_string()]);
    }
}
