//! Monitor session
//!
//! [`Monitor`] is the single processing context: it owns every piece of
//! mutable state (synchronizer buffers, grouping buffer, sender schedule,
//! recovery state) and is driven by explicit calls carrying the current
//! time. Each call returns the [`MonitorEvent`]s it produced, in order.
//! The tokio event loop in [`crate::runtime`] is one driver; tests drive it
//! directly.

use std::sync::MutexGuard;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::config::{ConfigError, MonitorConfig};
use crate::device::{ByteSource, DeviceError, SerialParams, SharedSource};
use crate::field::{ConsumerSet, ConsumerUpdate, CurveRecorder, DecodeError, SlotId};
use crate::protocol::{
    Frame, PresetCommand, ProtocolDefinition, ProtocolError, ProtocolRegistry, TimeCalibration,
};
use crate::recovery::{ConnectionRecovery, ProbeOutcome, RecoveryState};
use crate::scheduler::PeriodicScheduler;
use crate::timing::FrameTimingGrouper;
use crate::traffic::{Direction, TrafficLog, TrafficRecord};

/// Wall-clock time of a past monotonic instant
fn wall_clock(at: Instant) -> DateTime<Local> {
    let age = Instant::now().saturating_duration_since(at);
    let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
    Local::now() - age
}

/// Errors returned by [`Monitor`] operations
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Field error: {0}")]
    Field(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown preset: {0}")]
    UnknownPreset(SlotId),
}

/// Recovery notifications for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryEvent {
    /// The connection was lost; probing for the device
    Started,
    /// The device reappeared and is settling
    DeviceSeen,
    /// The device vanished again while settling
    DeviceLost,
    /// Reopened, periodic senders restored
    Reconnected,
    /// The device did not come back in time; reconnect manually
    TimedOut,
    /// Reopening failed; reconnect manually
    Failed(String),
}

/// Output of the processing context
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A validated frame
    Frame(Frame),
    /// A consumer decoded a new value from the preceding frame
    Consumer(ConsumerUpdate),
    /// A grouped received unit or a transmitted payload
    Traffic(TrafficRecord),
    /// Connection recovery progress
    Recovery(RecoveryEvent),
}

/// Serial monitor state and operations
pub struct Monitor {
    config: MonitorConfig,
    source: SharedSource,
    registry: ProtocolRegistry,
    recorder: CurveRecorder,
    grouper: FrameTimingGrouper,
    traffic: TrafficLog,
    scheduler: PeriodicScheduler,
    recovery: ConnectionRecovery,
}

impl Monitor {
    /// Validate `config` and build a closed monitor over `source`
    pub fn new(config: MonitorConfig, source: SharedSource) -> Result<Self, MonitorError> {
        config.validate()?;
        let registry = ProtocolRegistry::new(config.protocols.clone())?;
        let grouper = FrameTimingGrouper::new(config.frame_gap());

        Ok(Self {
            config,
            source,
            registry,
            recorder: CurveRecorder::default(),
            grouper,
            traffic: TrafficLog::default(),
            scheduler: PeriodicScheduler::new(),
            recovery: ConnectionRecovery::default(),
        })
    }

    /// Replace the recovery timings
    pub fn with_recovery(mut self, recovery: ConnectionRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    fn device(&self) -> MutexGuard<'_, Box<dyn ByteSource>> {
        self.source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Handle to the byte source, shared with the reader task
    pub fn source(&self) -> SharedSource {
        self.source.clone()
    }

    /// Current configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Protocol dispatcher
    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Curve history
    pub fn recorder(&self) -> &CurveRecorder {
        &self.recorder
    }

    /// Traffic history
    pub fn traffic(&self) -> &TrafficLog {
        &self.traffic
    }

    /// Recovery state
    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.state()
    }

    /// Whether probe ticks are needed
    pub fn is_probing(&self) -> bool {
        self.recovery.is_probing()
    }

    /// Whether the byte source is open
    pub fn is_connected(&self) -> bool {
        self.device().is_open()
    }

    /// Whether a periodic sender is running for `id`
    pub fn is_sending(&self, id: SlotId) -> bool {
        self.scheduler.is_active(id)
    }

    /// When the next periodic sender is due
    pub fn next_send_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Open the device and start every periodic preset.
    ///
    /// An already open device is disconnected first; the events of that
    /// disconnect, such as the flushed received unit, are returned.
    pub fn connect(
        &mut self,
        params: SerialParams,
        now: Instant,
    ) -> Result<Vec<MonitorEvent>, MonitorError> {
        let mut events = Vec::new();
        if self.is_connected() {
            events.extend(self.disconnect());
        }

        self.device().open(&params)?;
        self.registry.reset();
        self.grouper.flush();
        self.recovery.on_connected(params.clone());
        self.config.serial = params;

        let periodic: Vec<(SlotId, Duration)> = self
            .config
            .presets
            .iter()
            .filter(|(_, preset)| preset.periodic)
            .map(|(id, preset)| (id, preset.period()))
            .collect();
        for (id, period) in periodic {
            self.scheduler.start(id, period, now);
        }

        tracing::info!(
            "connected to {} ({} periodic sender(s))",
            self.config.serial.port,
            self.scheduler.active().len()
        );
        Ok(events)
    }

    /// Close the device, flushing the pending received unit
    pub fn disconnect(&mut self) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        self.flush_rx(&mut events);
        self.scheduler.stop_all();
        self.device().close();
        self.recovery.reset();
        tracing::info!("disconnected from {}", self.config.serial.port);
        events
    }

    /// Process a received chunk
    pub fn on_chunk(&mut self, chunk: &[u8], now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        if chunk.is_empty() {
            return events;
        }

        if let Some(unit) = self.grouper.on_chunk(chunk, now) {
            self.log_traffic(Direction::Rx, unit, &mut events);
        }

        for frame in self.registry.feed_at(chunk, wall_clock(now)) {
            let updates = self.config.consumers.apply(&frame);
            self.recorder.record(&self.config.consumers, &frame);
            events.push(MonitorEvent::Frame(frame));
            events.extend(updates.into_iter().map(MonitorEvent::Consumer));
        }
        events
    }

    /// The reader hit an error. A device I/O error on a live connection
    /// suspends the periodic senders, closes the device and starts probing.
    pub fn on_io_error(&mut self, error: &DeviceError, now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        if !error.is_disconnect() {
            tracing::debug!("ignoring reader error: {}", error);
            return events;
        }

        if self.recovery.on_io_error(now, self.scheduler.active()) {
            tracing::warn!("serial read failed: {}", error);
            self.flush_rx(&mut events);
            self.scheduler.stop_all();
            self.device().close();
            events.push(MonitorEvent::Recovery(RecoveryEvent::Started));
        }
        events
    }

    /// Recovery probe tick
    pub fn on_probe(&mut self, now: Instant) -> Vec<MonitorEvent> {
        if !self.recovery.is_probing() {
            return Vec::new();
        }

        let devices = self.device().enumerate();
        let event = match self.recovery.on_probe(now, &devices) {
            ProbeOutcome::NotActive | ProbeOutcome::Waiting => return Vec::new(),
            ProbeOutcome::DeviceSeen => RecoveryEvent::DeviceSeen,
            ProbeOutcome::DeviceLost => RecoveryEvent::DeviceLost,
            ProbeOutcome::TimedOut => {
                let timeout = DeviceError::RecoveryTimeout {
                    port: self.config.serial.port.clone(),
                    timeout: self.recovery.timeout(),
                };
                tracing::warn!("{}; reconnect manually", timeout);
                RecoveryEvent::TimedOut
            }
            ProbeOutcome::Reconnect(snapshot) => {
                let reopened = self.device().open(&snapshot.params);
                match reopened {
                    Ok(()) => {
                        self.recovery.on_reconnect_result(true);
                        for sender in &snapshot.senders {
                            if self.config.presets.get(sender.id).is_some() {
                                self.scheduler.start(sender.id, sender.period, now);
                            }
                        }
                        tracing::info!(
                            "reconnected to {}, {} periodic sender(s) restored",
                            snapshot.params.port,
                            snapshot.senders.len()
                        );
                        RecoveryEvent::Reconnected
                    }
                    Err(e) => {
                        self.recovery.on_reconnect_result(false);
                        let failure = DeviceError::ReconnectFailed {
                            port: snapshot.params.port.clone(),
                            reason: e.to_string(),
                        };
                        tracing::error!("{}", failure);
                        RecoveryEvent::Failed(failure.to_string())
                    }
                }
            }
        };
        vec![MonitorEvent::Recovery(event)]
    }

    /// Flush watchdog tick
    pub fn on_watchdog(&mut self, now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        if let Some(unit) = self.grouper.on_watchdog(now) {
            self.log_traffic(Direction::Rx, unit, &mut events);
        }
        events
    }

    /// Send every periodic preset that is due. A preset that fails to build
    /// or send has its sender stopped.
    pub fn on_send_due(&mut self, now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        for id in self.scheduler.due(now) {
            match self.send_preset(id) {
                Ok(record) => events.push(MonitorEvent::Traffic(record)),
                Err(e) => {
                    tracing::warn!("periodic send of preset {} stopped: {}", id, e);
                    self.scheduler.stop(id);
                }
            }
        }
        events
    }

    /// Write bytes to the device
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<TrafficRecord, MonitorError> {
        {
            let mut device = self.device();
            if !device.is_open() {
                return Err(DeviceError::NotOpen.into());
            }
            device.write(bytes)?;
        }
        tracing::debug!("tx: {}", crate::protocol::to_hex(bytes));
        Ok(self.traffic.push(Direction::Tx, bytes.to_vec()).clone())
    }

    /// Build and send a saved command
    pub fn send_preset(&mut self, id: SlotId) -> Result<TrafficRecord, MonitorError> {
        let preset = self
            .config
            .presets
            .get(id)
            .ok_or(MonitorError::UnknownPreset(id))?;
        let bytes = preset.build_now()?;
        self.send_raw(&bytes)
    }

    /// Send the device clock calibration command for the current local time
    pub fn send_time_calibration(&mut self) -> Result<TrafficRecord, MonitorError> {
        let command = TimeCalibration::encode(&Local::now());
        self.send_raw(&command)
    }

    /// Add a saved command
    pub fn add_preset(&mut self, preset: PresetCommand) -> Result<SlotId, MonitorError> {
        preset.validate()?;
        Ok(self.config.presets.insert(preset))
    }

    /// Edit a saved command in place. A running sender picks up the new
    /// period.
    pub fn update_preset(
        &mut self,
        id: SlotId,
        preset: PresetCommand,
        now: Instant,
    ) -> Result<(), MonitorError> {
        preset.validate()?;
        let period = preset.period();
        let periodic = preset.periodic;
        self.config
            .presets
            .replace(id, preset)
            .ok_or(MonitorError::UnknownPreset(id))?;

        if periodic && self.is_connected() {
            self.scheduler.start(id, period, now);
        } else {
            self.scheduler.stop(id);
        }
        Ok(())
    }

    /// Delete a saved command, stopping its sender
    pub fn remove_preset(&mut self, id: SlotId) -> Option<PresetCommand> {
        self.scheduler.stop(id);
        self.config.presets.remove(id)
    }

    /// Turn periodic sending of a preset on or off. Sending starts
    /// immediately only while connected.
    pub fn set_periodic(
        &mut self,
        id: SlotId,
        enabled: bool,
        now: Instant,
    ) -> Result<(), MonitorError> {
        let mut preset = self
            .config
            .presets
            .get(id)
            .cloned()
            .ok_or(MonitorError::UnknownPreset(id))?;
        preset.periodic = enabled;
        self.update_preset(id, preset, now)
    }

    /// Replace the custom protocol definitions
    pub fn set_protocols(
        &mut self,
        definitions: Vec<ProtocolDefinition>,
    ) -> Result<(), MonitorError> {
        self.registry.set_definitions(definitions.clone())?;
        self.config.protocols = definitions;
        Ok(())
    }

    /// Replace the consumers. A running recording is stopped since its
    /// columns no longer match.
    pub fn set_consumers(&mut self, consumers: ConsumerSet) -> Result<(), MonitorError> {
        consumers.validate()?;
        self.recorder.stop();
        self.config.consumers = consumers;
        Ok(())
    }

    /// Change the traffic grouping threshold (clamped to 10-5000 ms)
    pub fn set_frame_gap(&mut self, gap: Duration) {
        self.grouper.set_gap(gap);
        self.config.frame_gap_ms = self.grouper.gap().as_millis() as u64;
    }

    /// Start recording the flagged curves
    pub fn start_recording(&mut self) {
        self.recorder.start(&self.config.consumers);
    }

    /// Stop recording, keeping the history
    pub fn stop_recording(&mut self) {
        self.recorder.stop();
    }

    fn flush_rx(&mut self, events: &mut Vec<MonitorEvent>) {
        if let Some(unit) = self.grouper.flush() {
            self.log_traffic(Direction::Rx, unit, events);
        }
    }

    fn log_traffic(&mut self, direction: Direction, bytes: Vec<u8>, events: &mut Vec<MonitorEvent>) {
        let record = self.traffic.push(direction, bytes).clone();
        events.push(MonitorEvent::Traffic(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{shared, MockByteSource};
    use crate::protocol::DEFAULT_HEADER;

    const MS: Duration = Duration::from_millis(1);

    fn default_frame(co: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 38];
        frame[..2].copy_from_slice(&DEFAULT_HEADER);
        frame[2..4].copy_from_slice(&co.to_le_bytes());
        frame[36] = 0xAA;
        frame[37] = 0xAA;
        frame
    }

    fn monitor() -> (Monitor, MockByteSource) {
        let mock = MockByteSource::new(["COM3"]);
        let monitor = Monitor::new(MonitorConfig::default(), shared(mock.clone())).unwrap();
        (monitor, mock)
    }

    #[test]
    fn test_frame_then_consumer_updates() {
        let (mut monitor, _) = monitor();
        let events = monitor.on_chunk(&default_frame(412), Instant::now());

        assert!(matches!(events[0], MonitorEvent::Frame(_)));
        let curves: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Consumer(ConsumerUpdate::Curve { value, .. }) => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(curves.len(), 3);
        assert!(curves.contains(&412.0));
    }

    #[test]
    fn test_traffic_unit_emitted_after_gap() {
        let (mut monitor, _) = monitor();
        let t0 = Instant::now();
        monitor.on_chunk(&[1, 2], t0);
        assert!(monitor.on_watchdog(t0 + 50 * MS).is_empty());

        let events = monitor.on_watchdog(t0 + 100 * MS);
        match events.as_slice() {
            [MonitorEvent::Traffic(record)] => {
                assert_eq!(record.direction, Direction::Rx);
                assert_eq!(record.bytes, vec![1, 2]);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_reconnect_flushes_pending_unit() {
        let (mut monitor, mock) = monitor();
        let t0 = Instant::now();
        assert!(monitor.connect(SerialParams::new("COM3"), t0).unwrap().is_empty());
        monitor.on_chunk(&[1, 2, 3], t0);

        let events = monitor.connect(SerialParams::new("COM3"), t0 + 10 * MS).unwrap();
        match events.as_slice() {
            [MonitorEvent::Traffic(record)] => {
                assert_eq!(record.direction, Direction::Rx);
                assert_eq!(record.bytes, vec![1, 2, 3]);
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert_eq!(mock.opens().len(), 2);
        assert_eq!(monitor.traffic().len(), 1);
    }

    #[test]
    fn test_frames_stamped_from_arrival_instant() {
        let (mut monitor, _) = monitor();
        let now = Instant::now();
        let earlier = now.checked_sub(Duration::from_secs(2)).unwrap();

        let stamp = |events: Vec<MonitorEvent>| {
            events
                .into_iter()
                .find_map(|e| match e {
                    MonitorEvent::Frame(frame) => Some(frame.timestamp()),
                    _ => None,
                })
                .unwrap()
        };
        let first = stamp(monitor.on_chunk(&default_frame(1), earlier));
        let second = stamp(monitor.on_chunk(&default_frame(2), now));

        let apart = (second - first).num_milliseconds();
        assert!((1900..=2100).contains(&apart), "frames {} ms apart", apart);
    }

    #[test]
    fn test_send_requires_connection() {
        let (mut monitor, mock) = monitor();
        assert!(matches!(
            monitor.send_raw(&[1]),
            Err(MonitorError::Device(DeviceError::NotOpen))
        ));
        monitor.connect(SerialParams::new("COM3"), Instant::now()).unwrap();
        monitor.send_raw(&[1]).unwrap();
        assert_eq!(mock.writes(), vec![vec![1]]);
        assert_eq!(monitor.traffic().len(), 1);
    }

    #[test]
    fn test_non_io_error_does_not_start_recovery() {
        let (mut monitor, _) = monitor();
        monitor.connect(SerialParams::new("COM3"), Instant::now()).unwrap();
        assert!(monitor.on_io_error(&DeviceError::NotOpen, Instant::now()).is_empty());
        assert_eq!(monitor.recovery_state(), RecoveryState::Connected);
    }

    #[test]
    fn test_unknown_preset() {
        let (mut monitor, _) = monitor();
        let id = SlotId::new_v4();
        assert!(matches!(
            monitor.send_preset(id),
            Err(MonitorError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_set_frame_gap_updates_config() {
        let (mut monitor, _) = monitor();
        monitor.set_frame_gap(Duration::from_millis(3));
        assert_eq!(monitor.config().frame_gap_ms, 10);
    }
}
