use pcmflow::audio::{AudioFormat, HwError, MockDevice, MockOp, SampleFormat};
use pcmflow::state::{StreamConfig, StreamError, StreamState};
use pcmflow::stream::{AudioSink, AudioSource};
use std::io::{Cursor, Read, Write};

fn config() -> StreamConfig {
    StreamConfig {
        push_retry_delay_us: 10,
        resume_interval_us: 10,
        ..StreamConfig::manual()
    }
}

fn format() -> AudioFormat {
    AudioFormat::new(8000, 1, SampleFormat::I16)
}

fn sink() -> (MockDevice, AudioSink<MockDevice>) {
    let device = MockDevice::new(16, 4);
    let sink = AudioSink::new(device.clone(), config()).unwrap();
    sink.set_format(format()).unwrap();
    (device, sink)
}

#[test]
fn test_suspended_device_is_resumed_during_write() {
    let (device, sink) = sink();
    let mut writer = sink.start_push().unwrap();
    device.fail_next(MockOp::Write, HwError::ESTRPIPE);
    device.fail_times(MockOp::Resume, HwError::EAGAIN, 2);

    assert_eq!(writer.write(&[1u8; 16]).unwrap(), 16);

    let counters = device.counters();
    assert_eq!(counters.resumes, 3);
    assert_eq!(counters.opens, 1);
    assert_eq!(sink.state(), StreamState::Active);
    assert_eq!(sink.error(), StreamError::NoError);
}

#[test]
fn test_pipe_is_cleared_by_prepare_alone() {
    let (device, sink) = sink();
    sink.start(Cursor::new(vec![3u8; 64])).unwrap();
    device.fail_next(MockOp::Write, HwError::EPIPE);

    // Fault tick: recovered, nothing written, data kept for the next tick
    assert!(sink.tick());
    assert!(device.played().is_empty());
    assert_eq!(device.counters().prepares, 2);

    assert!(sink.tick());
    assert_eq!(device.played().len(), 32);
    assert_eq!(device.counters().opens, 1);
    assert_eq!(sink.state(), StreamState::Active);
}

#[test]
fn test_failed_prepare_reopens_device() {
    let (device, sink) = sink();
    sink.start(Cursor::new(vec![3u8; 64])).unwrap();
    device.fail_next(MockOp::Write, HwError::EPIPE);
    device.fail_next(MockOp::Prepare, HwError::EIO);

    assert!(sink.tick());
    let counters = device.counters();
    assert_eq!(counters.opens, 2);
    assert_eq!(counters.closes, 1);
    assert_eq!(device.open_handles(), 1);

    assert!(sink.tick());
    assert_eq!(device.played().len(), 32);
}

#[test]
fn test_failed_reopen_is_fatal() {
    let (device, sink) = sink();
    sink.start(Cursor::new(vec![3u8; 64])).unwrap();
    device.fail_next(MockOp::Write, HwError::EPIPE);
    device.fail_next(MockOp::Prepare, HwError::EIO);
    device.fail_times(MockOp::Open, HwError::ENODEV, 5);

    assert!(!sink.tick());
    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(sink.error(), StreamError::FatalError);
    assert_eq!(device.open_handles(), 0);
}

#[test]
fn test_bytes_free_recovers_from_pipe() {
    let (device, sink) = sink();
    let _writer = sink.start_push().unwrap();
    device.fail_next(MockOp::Avail, HwError::EPIPE);

    assert_eq!(sink.bytes_free(), 32);
    assert_eq!(sink.state(), StreamState::Idle);
    assert_eq!(device.counters().opens, 1);
}

#[test]
fn test_would_block_needs_no_repair() {
    let (device, sink) = sink();
    let mut writer = sink.start_push().unwrap();
    device.fail_next(MockOp::Write, HwError::EAGAIN);

    assert_eq!(writer.write(&[0u8; 8]).unwrap(), 8);
    assert_eq!(device.counters().prepares, 1);
    assert_eq!(device.counters().resumes, 0);
}

#[test]
fn test_capture_resume_exhaustion_falls_back_to_prepare() {
    let device = MockDevice::new(8, 2);
    let source = AudioSource::new(device.clone(), config()).unwrap();
    source.set_format(format()).unwrap();
    let mut reader = source.start_push().unwrap();

    device.feed(&[1, 2, 3, 4]);
    device.fail_next(MockOp::Read, HwError::EIO);
    device.fail_times(MockOp::Resume, HwError::EAGAIN, 10);

    // Fault read: recovered but nothing delivered yet
    let mut buf = [0u8; 4];
    assert!(reader.read(&mut buf).is_err());

    let counters = device.counters();
    assert_eq!(counters.resumes, 5);
    assert_eq!(counters.prepares, 2);
    assert_eq!(counters.opens, 1);

    assert_eq!(reader.read(&mut buf).unwrap(), 4);
    assert_eq!(buf, [1, 2, 3, 4]);
    assert_eq!(source.state(), StreamState::Idle);
}
