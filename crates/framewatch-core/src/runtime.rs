//! Tokio driver for a [`Monitor`]
//!
//! A blocking reader task polls the shared byte source and forwards chunks
//! over a channel. One async loop owns the monitor and multiplexes those
//! chunks, user commands, the flush watchdog, the recovery probe and the
//! periodic senders, so no two handlers ever run at the same time.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceError, SerialParams, SharedSource};
use crate::field::SlotId;
use crate::recovery::PROBE_INTERVAL;
use crate::session::{Monitor, MonitorEvent};
use crate::timing::WATCHDOG_INTERVAL;

/// How often the reader polls the byte source
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Reader-to-loop queue depth
const READER_QUEUE: usize = 256;

/// What the reader task hands to the processing loop
#[derive(Debug)]
pub enum ReaderMessage {
    /// Bytes received at the given instant
    Chunk(Vec<u8>, Instant),
    /// The read failed
    Error(DeviceError, Instant),
}

/// User requests accepted by [`run`]
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorCommand {
    /// Open a device
    Connect(SerialParams),
    /// Close the device
    Disconnect,
    /// Send bytes as-is
    SendRaw(Vec<u8>),
    /// Send a saved command once
    SendPreset(SlotId),
    /// Send the clock calibration command
    SendTimeCalibration,
    /// Start or stop periodic sending of a preset
    SetPeriodic(SlotId, bool),
    /// Start recording curves
    StartRecording,
    /// Stop recording curves
    StopRecording,
}

/// Spawn the blocking reader. It reads only while the source is open and
/// exits when `token` is cancelled or the loop drops its receiver.
pub fn spawn_reader(
    source: SharedSource,
    tx: mpsc::Sender<ReaderMessage>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        tracing::debug!("reader started");
        while !token.is_cancelled() {
            let result = {
                let mut device = source.lock().unwrap_or_else(|p| p.into_inner());
                if device.is_open() {
                    Some(device.read_available())
                } else {
                    None
                }
            };

            let message = match result {
                Some(Ok(bytes)) if !bytes.is_empty() => Some(ReaderMessage::Chunk(bytes, Instant::now())),
                Some(Err(e)) => Some(ReaderMessage::Error(e, Instant::now())),
                _ => None,
            };
            if let Some(message) = message {
                if tx.blocking_send(message).is_err() {
                    break;
                }
            }

            std::thread::sleep(READ_POLL_INTERVAL);
        }
        tracing::debug!("reader stopped");
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

fn apply_command(monitor: &mut Monitor, command: MonitorCommand) -> Vec<MonitorEvent> {
    let now = Instant::now();
    let result = match command {
        MonitorCommand::Connect(params) => monitor.connect(params, now),
        MonitorCommand::Disconnect => Ok(monitor.disconnect()),
        MonitorCommand::SendRaw(bytes) => monitor
            .send_raw(&bytes)
            .map(|r| vec![MonitorEvent::Traffic(r)]),
        MonitorCommand::SendPreset(id) => monitor
            .send_preset(id)
            .map(|r| vec![MonitorEvent::Traffic(r)]),
        MonitorCommand::SendTimeCalibration => monitor
            .send_time_calibration()
            .map(|r| vec![MonitorEvent::Traffic(r)]),
        MonitorCommand::SetPeriodic(id, enabled) => {
            monitor.set_periodic(id, enabled, now).map(|_| Vec::new())
        }
        MonitorCommand::StartRecording => {
            monitor.start_recording();
            Ok(Vec::new())
        }
        MonitorCommand::StopRecording => {
            monitor.stop_recording();
            Ok(Vec::new())
        }
    };

    result.unwrap_or_else(|e| {
        tracing::warn!("command failed: {}", e);
        Vec::new()
    })
}

/// Drive `monitor` until `token` is cancelled or the event receiver is
/// dropped. Returns the monitor, closed.
pub async fn run(
    mut monitor: Monitor,
    mut commands: mpsc::Receiver<MonitorCommand>,
    events: mpsc::Sender<MonitorEvent>,
    token: CancellationToken,
) -> Monitor {
    let (tx, mut rx) = mpsc::channel(READER_QUEUE);
    let reader_token = token.child_token();
    let reader = spawn_reader(monitor.source(), tx, reader_token.clone());

    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut probe = tokio::time::interval(PROBE_INTERVAL);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'outer: loop {
        let was_probing = monitor.is_probing();
        let send_deadline = monitor.next_send_deadline();

        let produced = tokio::select! {
            _ = token.cancelled() => break 'outer,
            message = rx.recv() => match message {
                Some(ReaderMessage::Chunk(bytes, at)) => monitor.on_chunk(&bytes, at),
                Some(ReaderMessage::Error(e, at)) => monitor.on_io_error(&e, at),
                None => break 'outer,
            },
            Some(command) = commands.recv() => apply_command(&mut monitor, command),
            _ = watchdog.tick() => monitor.on_watchdog(Instant::now()),
            _ = probe.tick(), if was_probing => monitor.on_probe(Instant::now()),
            _ = sleep_until(send_deadline) => monitor.on_send_due(Instant::now()),
        };

        if !was_probing && monitor.is_probing() {
            probe.reset();
        }

        for event in produced {
            if events.send(event).await.is_err() {
                tracing::debug!("event receiver dropped, stopping");
                break 'outer;
            }
        }
    }

    reader_token.cancel();
    if let Err(e) = reader.await {
        tracing::warn!("reader task failed: {}", e);
    }
    if monitor.is_connected() {
        monitor.disconnect();
    }
    monitor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::device::{shared, MockByteSource};

    #[tokio::test]
    async fn test_reader_forwards_chunks_and_errors() {
        let mock = MockByteSource::new(["COM1"]);
        let source = shared(mock.clone());
        source
            .lock()
            .unwrap()
            .open(&SerialParams::new("COM1"))
            .unwrap();
        mock.push_incoming(vec![1, 2, 3]);

        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let reader = spawn_reader(source, tx, token.clone());

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(first, Some(ReaderMessage::Chunk(ref b, _)) if b == &[1, 2, 3]));

        mock.fail_reads(1);
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(second, Some(ReaderMessage::Error(DeviceError::Io(_), _))));

        token.cancel();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_reach_the_device() {
        let mock = MockByteSource::new(["COM1"]);
        let monitor = Monitor::new(MonitorConfig::default(), shared(mock.clone())).unwrap();

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(monitor, cmd_rx, event_tx, token.clone()));

        cmd_tx.send(MonitorCommand::Connect(SerialParams::new("COM1"))).await.unwrap();
        cmd_tx.send(MonitorCommand::SendRaw(vec![0x55])).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(MonitorEvent::Traffic(ref r)) if r.bytes == vec![0x55]));
        assert_eq!(mock.writes(), vec![vec![0x55]]);

        token.cancel();
        let monitor = handle.await.unwrap();
        assert!(!monitor.is_connected());
    }
}
