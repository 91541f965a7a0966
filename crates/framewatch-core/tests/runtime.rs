//! The async runtime against the demo device and a hot-plugged mock

use std::time::Duration;

use framewatch_core::config::MonitorConfig;
use framewatch_core::demo::{DemoDevice, DemoSource, DEMO_PORT};
use framewatch_core::device::{shared, MockByteSource, SerialParams};
use framewatch_core::field::ConsumerUpdate;
use framewatch_core::protocol::DEFAULT_PROTOCOL_NAME;
use framewatch_core::recovery::ConnectionRecovery;
use framewatch_core::runtime::{run, MonitorCommand};
use framewatch_core::session::{Monitor, MonitorEvent, RecoveryEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// Receive events until `pick` returns a value
async fn wait_for<T>(
    events: &mut mpsc::Receiver<MonitorEvent>,
    mut pick: impl FnMut(&MonitorEvent) -> Option<T>,
) -> T {
    let search = async {
        while let Some(event) = events.recv().await {
            if let Some(found) = pick(&event) {
                return found;
            }
        }
        panic!("event channel closed");
    };
    tokio::time::timeout(WAIT, search).await.expect("timed out waiting for event")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_demo_frames_reach_consumers() {
    let source = DemoSource::new(DemoDevice::with_seed(7), Duration::from_millis(20));
    let monitor = Monitor::new(MonitorConfig::default(), shared(source)).unwrap();

    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let token = CancellationToken::new();
    let handle = tokio::spawn(run(monitor, cmd_rx, event_tx, token.clone()));

    cmd_tx
        .send(MonitorCommand::Connect(SerialParams::new(DEMO_PORT)))
        .await
        .unwrap();

    for _ in 0..3 {
        let frame = wait_for(&mut event_rx, |e| match e {
            MonitorEvent::Frame(frame) => Some(frame.clone()),
            _ => None,
        })
        .await;
        assert_eq!(frame.protocol(), DEFAULT_PROTOCOL_NAME);
        assert_eq!(frame.bytes().len(), 38);
    }

    let co = wait_for(&mut event_rx, |e| match e {
        MonitorEvent::Consumer(ConsumerUpdate::Curve { value, .. }) => Some(*value),
        _ => None,
    })
    .await;
    assert!(co.is_finite());

    token.cancel();
    let monitor = handle.await.unwrap();
    assert!(!monitor.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unplugged_device_is_recovered() {
    const PORT: &str = "/dev/ttyUSB1";
    let mock = MockByteSource::new([PORT]);
    let monitor = Monitor::new(MonitorConfig::default(), shared(mock.clone()))
        .unwrap()
        .with_recovery(ConnectionRecovery::new(WAIT, Duration::from_millis(200)));

    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let token = CancellationToken::new();
    let handle = tokio::spawn(run(monitor, cmd_rx, event_tx, token.clone()));

    cmd_tx
        .send(MonitorCommand::Connect(SerialParams::new(PORT)))
        .await
        .unwrap();
    cmd_tx.send(MonitorCommand::SendRaw(vec![0x01])).await.unwrap();
    wait_for(&mut event_rx, |e| matches!(e, MonitorEvent::Traffic(_)).then_some(())).await;

    mock.unplug(PORT);
    let started = wait_for(&mut event_rx, |e| match e {
        MonitorEvent::Recovery(r) => Some(r.clone()),
        _ => None,
    })
    .await;
    assert_eq!(started, RecoveryEvent::Started);

    mock.plug(PORT);
    wait_for(&mut event_rx, |e| {
        matches!(e, MonitorEvent::Recovery(RecoveryEvent::Reconnected)).then_some(())
    })
    .await;
    assert_eq!(mock.opens().len(), 2);

    let mut frame = vec![0u8; 38];
    frame[..2].copy_from_slice(&[0xA8, 0xA8]);
    frame[36..].copy_from_slice(&[0xAA, 0xAA]);
    mock.push_incoming(frame.clone());
    let received = wait_for(&mut event_rx, |e| match e {
        MonitorEvent::Frame(f) => Some(f.bytes().to_vec()),
        _ => None,
    })
    .await;
    assert_eq!(received, frame);

    token.cancel();
    handle.await.unwrap();
}
