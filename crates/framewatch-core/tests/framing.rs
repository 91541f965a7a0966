//! Stream framing: chunking invariance, concatenation and resync

use framewatch_core::checksum::ChecksumKind;
use framewatch_core::demo::DemoDevice;
use framewatch_core::protocol::{FrameSynchronizer, ProtocolDefinition, ProtocolRegistry};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn modbus_protocol() -> ProtocolDefinition {
    ProtocolDefinition::new("meter", vec![0x55, 0xAA], vec![], 9, ChecksumKind::Crc16Modbus)
        .expect("valid definition")
}

/// header + 5 payload bytes, then the CRC over everything before it
fn modbus_frame(seed: u8) -> Vec<u8> {
    let mut frame = vec![0x55, 0xAA];
    frame.extend((0..5).map(|i| seed.wrapping_add(i)));
    ChecksumKind::Crc16Modbus.append(&mut frame);
    frame
}

#[test]
fn test_frame_layout_helper() {
    let frame = modbus_frame(1);
    assert_eq!(frame.len(), 9);
    assert!(ChecksumKind::Crc16Modbus.verify(&frame).is_ok());
}

#[test]
fn test_chunking_invariance_every_split() {
    let frame = modbus_frame(0x10);

    let mut whole = FrameSynchronizer::new(modbus_protocol());
    let expected = whole.feed(&frame);
    assert_eq!(expected.len(), 1);

    for split in 1..frame.len() {
        let mut sync = FrameSynchronizer::new(modbus_protocol());
        let mut frames = sync.feed(&frame[..split]);
        assert!(frames.is_empty(), "frame emitted early at split {}", split);
        frames.extend(sync.feed(&frame[split..]));
        assert_eq!(frames.len(), 1, "split {}", split);
        assert_eq!(frames[0].bytes(), expected[0].bytes());
    }
}

#[test]
fn test_byte_by_byte_feed() {
    let frame = modbus_frame(0x42);
    let mut sync = FrameSynchronizer::new(modbus_protocol());
    let frames: Vec<_> = frame.iter().flat_map(|b| sync.feed(&[*b])).collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].bytes(), frame.as_slice());
}

#[test]
fn test_concatenated_frames_in_order() {
    let frames: Vec<Vec<u8>> = (0..25).map(|i| modbus_frame(i * 3)).collect();
    let stream: Vec<u8> = frames.concat();

    let mut sync = FrameSynchronizer::new(modbus_protocol());
    let emitted = sync.feed(&stream);
    assert_eq!(emitted.len(), frames.len());
    for (frame, expected) in emitted.iter().zip(&frames) {
        assert_eq!(frame.bytes(), expected.as_slice());
        assert_eq!(frame.protocol(), "meter");
    }
    assert_eq!(sync.buffered(), 0);
}

#[test]
fn test_resync_after_bad_checksum() {
    let first = modbus_frame(1);
    let mut corrupted = modbus_frame(2);
    corrupted[4] ^= 0xFF;
    let last = modbus_frame(3);

    let stream = [first.clone(), corrupted, last.clone()].concat();
    let mut sync = FrameSynchronizer::new(modbus_protocol());
    let emitted = sync.feed(&stream);

    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].bytes(), first.as_slice());
    assert_eq!(emitted[1].bytes(), last.as_slice());
    assert_eq!(sync.stats().checksum_mismatches, 1);
}

#[test]
fn test_resync_after_noise_between_frames() {
    let first = modbus_frame(7);
    let last = modbus_frame(9);
    // Noise containing a false header
    let noise = vec![0x00, 0x55, 0xAA, 0x01, 0xFF];

    let stream = [first.clone(), noise, last.clone()].concat();
    let mut sync = FrameSynchronizer::new(modbus_protocol());
    let emitted = sync.feed(&stream);

    let bytes: Vec<&[u8]> = emitted.iter().map(|f| f.bytes()).collect();
    assert_eq!(bytes, vec![first.as_slice(), last.as_slice()]);
}

#[test]
fn test_demo_stream_in_random_chunks() {
    let mut device = DemoDevice::with_seed(42);
    let stream: Vec<u8> = (0..200).flat_map(|_| device.next_frame()).collect();

    let mut rng = StdRng::seed_from_u64(99);
    let mut registry = ProtocolRegistry::default();
    let mut count = 0;
    let mut rest = stream.as_slice();
    while !rest.is_empty() {
        let take = rng.gen_range(1..=rest.len().min(64));
        let (chunk, tail) = rest.split_at(take);
        count += registry.feed(chunk).len();
        rest = tail;
    }
    assert_eq!(count, 200);
}

#[test]
fn test_registry_feeds_protocols_independently() {
    let mut device = DemoDevice::with_seed(3);
    let mut registry = ProtocolRegistry::new(vec![modbus_protocol()]).unwrap();

    let stream = [device.next_frame(), modbus_frame(5), device.next_frame()].concat();
    let frames = registry.feed(&stream);
    let names: Vec<&str> = frames.iter().map(|f| f.protocol()).collect();

    // Built-in frames come first, then custom ones
    assert_eq!(names, vec!["default", "default", "meter"]);
}
