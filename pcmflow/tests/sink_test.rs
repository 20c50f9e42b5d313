use pcmflow::audio::{AudioError, AudioFormat, HwError, MockDevice, MockOp, SampleFormat};
use pcmflow::state::{StreamConfig, StreamError, StreamEvent, StreamState};
use pcmflow::stream::AudioSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{Cursor, ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// 16 frames of buffer, 4 frame periods; 8 kHz mono 16-bit => 32/8 bytes
fn setup() -> (MockDevice, AudioSink<MockDevice>) {
    setup_with(StreamConfig::manual())
}

fn setup_with(config: StreamConfig) -> (MockDevice, AudioSink<MockDevice>) {
    let device = MockDevice::new(16, 4);
    let sink = AudioSink::new(device.clone(), config).unwrap();
    sink.set_format(AudioFormat::new(8000, 1, SampleFormat::I16))
        .unwrap();
    (device, sink)
}

/// Reader backed by a queue the test can refill
#[derive(Clone, Default)]
struct Feed(Arc<Mutex<VecDeque<u8>>>);

impl Feed {
    fn push(&self, data: &[u8]) {
        self.0.lock().extend(data.iter().copied());
    }
}

impl Read for Feed {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut queue = self.0.lock();
        let n = buf.len().min(queue.len());
        for (dst, src) in buf.iter_mut().zip(queue.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

fn events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[test]
fn test_zero_sample_rate_fails_with_open_error() {
    let (device, sink) = setup();
    sink.set_format(AudioFormat::new(0, 1, SampleFormat::I16))
        .unwrap();

    let result = sink.start(Cursor::new(vec![0u8; 64]));

    assert!(matches!(result, Err(AudioError::InvalidFormat(_))));
    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(sink.error(), StreamError::OpenError);
    assert_eq!(device.counters().opens, 0);
}

#[test]
fn test_open_is_retried_then_reported() {
    let (device, sink) = setup();
    device.fail_times(MockOp::Open, HwError::ENODEV, 5);

    let result = sink.start_push();

    assert!(matches!(result, Err(AudioError::OpenFailed { .. })));
    assert_eq!(device.counters().opens, 5);
    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(sink.error(), StreamError::OpenError);
}

#[test]
fn test_open_succeeds_after_transient_failures() {
    let (device, sink) = setup();
    device.fail_times(MockOp::Open, HwError::ENODEV, 2);

    assert!(sink.start_push().is_ok());
    assert_eq!(device.counters().opens, 3);
    assert_eq!(sink.state(), StreamState::Idle);
}

#[test]
fn test_pull_playback_moves_whole_frames() {
    let (device, sink) = setup();
    sink.start(Cursor::new((1..=7).collect::<Vec<u8>>())).unwrap();
    assert_eq!(sink.state(), StreamState::Active);

    assert!(sink.tick());
    assert_eq!(device.played(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(device.played().len() % 2, 0);
}

#[test]
fn test_underrun_reported_once_per_episode() {
    let (device, sink) = setup();
    let feed = Feed::default();
    let mut rx = sink.subscribe();

    sink.start(feed.clone()).unwrap();
    assert_eq!(
        events(&mut rx),
        vec![StreamEvent::StateChanged {
            state: StreamState::Active
        }]
    );

    // Client has nothing and the hardware is empty
    for _ in 0..3 {
        assert!(sink.tick());
    }
    assert_eq!(sink.state(), StreamState::Idle);
    assert_eq!(sink.error(), StreamError::UnderrunError);
    assert_eq!(
        events(&mut rx),
        vec![
            StreamEvent::StateChanged {
                state: StreamState::Idle
            },
            StreamEvent::ErrorChanged {
                error: StreamError::UnderrunError
            },
        ]
    );

    // Data comes back: Active again with the error cleared
    feed.push(&[0u8; 16]);
    assert!(sink.tick());
    assert_eq!(sink.state(), StreamState::Active);
    assert_eq!(sink.error(), StreamError::NoError);
    events(&mut rx);

    // Second starvation is a new episode
    device.consume_all();
    assert!(sink.tick());
    assert_eq!(sink.state(), StreamState::Idle);
    assert_eq!(
        events(&mut rx)
            .iter()
            .filter(|e| matches!(e, StreamEvent::StateChanged { .. }))
            .count(),
        1
    );
}

#[test]
fn test_no_underrun_while_hardware_has_data() {
    let (device, sink) = setup();
    let feed = Feed::default();
    sink.start(feed.clone()).unwrap();

    feed.push(&[0u8; 32]);
    assert!(sink.tick());
    assert_eq!(device.queued(), 32);

    // One period played, client dry: still more than a period queued
    device.consume(8);
    assert!(sink.tick());
    assert_eq!(sink.state(), StreamState::Active);
    assert_eq!(sink.error(), StreamError::NoError);
}

#[test]
fn test_client_read_error_stops_with_io_error() {
    struct Failing;
    impl Read for Failing {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "decoder crashed"))
        }
    }

    let (device, sink) = setup();
    sink.start(Failing).unwrap();

    assert!(!sink.tick());
    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(sink.error(), StreamError::IoError);
    assert_eq!(device.open_handles(), 0);
}

#[test]
fn test_push_write_truncates_after_retry_budget() {
    let config = StreamConfig {
        push_retry_delay_us: 10,
        ..StreamConfig::manual()
    };
    let (device, sink) = setup_with(config);
    let mut writer = sink.start_push().unwrap();

    let data = vec![1u8; 64];
    let written = writer.write(&data).unwrap();

    assert_eq!(written, 32);
    assert!(written < data.len());
    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(sink.error(), StreamError::FatalError);
    assert_eq!(device.open_handles(), 0);

    let err = writer.write(&data).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
}

#[test]
fn test_stalled_write_on_full_hardware_returns_zero() {
    let config = StreamConfig {
        push_retry_delay_us: 10,
        ..StreamConfig::manual()
    };
    let (_device, sink) = setup_with(config);
    let mut writer = sink.start_push().unwrap();
    assert_eq!(writer.write(&[0u8; 32]).unwrap(), 32);

    // Nothing fits: the budget runs out and the empty count is reported
    assert_eq!(writer.write(&[0u8; 8]).unwrap(), 0);
    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(sink.error(), StreamError::FatalError);

    let err = writer.write(&[0u8; 8]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
}

#[test]
fn test_push_write_survives_short_writes() {
    let (device, sink) = setup();
    device.set_write_limit(Some(4));
    let mut writer = sink.start_push().unwrap();

    assert_eq!(writer.write(&[7u8; 16]).unwrap(), 16);
    assert_eq!(device.played(), vec![7u8; 16]);
    assert_eq!(sink.state(), StreamState::Active);
}

#[test]
fn test_push_write_keeps_frame_alignment() {
    let (device, sink) = setup();
    let mut writer = sink.start_push().unwrap();
    assert_eq!(sink.state(), StreamState::Idle);

    assert_eq!(writer.write(&[1, 2, 3]).unwrap(), 2);
    assert_eq!(device.played(), vec![1, 2]);
    assert_eq!(sink.state(), StreamState::Active);

    assert_eq!(writer.write(&[9]).unwrap(), 0);
}

#[test]
fn test_push_mode_tick_reports_underrun() {
    let (device, sink) = setup();
    let mut writer = sink.start_push().unwrap();

    writer.write(&[0u8; 32]).unwrap();
    assert!(sink.tick());
    assert_eq!(sink.state(), StreamState::Active);

    device.consume_all();
    assert!(sink.tick());
    assert_eq!(sink.state(), StreamState::Idle);
    assert_eq!(sink.error(), StreamError::UnderrunError);
}

#[test]
fn test_restart_detaches_previous_writer() {
    let (_device, sink) = setup();
    let mut first = sink.start_push().unwrap();
    let mut second = sink.start_push().unwrap();

    assert!(!first.is_attached());
    assert_eq!(first.write(&[0, 0]).unwrap_err().kind(), ErrorKind::NotConnected);
    assert_eq!(second.write(&[0, 0]).unwrap(), 2);
}

#[test]
fn test_suspend_resume_restores_active() {
    let (device, sink) = setup();
    let feed = Feed::default();
    sink.start(feed.clone()).unwrap();
    feed.push(&[0u8; 16]);
    assert!(sink.tick());
    assert_eq!(sink.state(), StreamState::Active);

    sink.suspend();
    assert_eq!(sink.state(), StreamState::Suspended);
    assert_eq!(device.counters().drains, 1);
    assert_eq!(sink.bytes_free(), 0);

    // Ticks while suspended move nothing
    feed.push(&[0u8; 16]);
    assert!(sink.tick());
    assert_eq!(device.played().len(), 16);

    let prepares = device.counters().prepares;
    sink.resume();
    assert_eq!(sink.state(), StreamState::Active);
    assert_eq!(sink.error(), StreamError::NoError);
    assert_eq!(device.counters().prepares, prepares + 1);
    assert_eq!(sink.bytes_free(), sink.period_size());

    assert!(sink.tick());
    assert_eq!(device.played().len(), 32);
    assert_eq!(sink.bytes_free(), 16);
}

#[test]
fn test_suspend_resume_restores_idle() {
    let (_device, sink) = setup();
    let _writer = sink.start_push().unwrap();

    sink.suspend();
    sink.resume();
    assert_eq!(sink.state(), StreamState::Idle);
}

#[test]
fn test_stop_drains_active_stream() {
    let (device, sink) = setup();
    let mut writer = sink.start_push().unwrap();
    writer.write(&[0u8; 16]).unwrap();
    assert_eq!(sink.state(), StreamState::Active);

    sink.stop();

    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(sink.error(), StreamError::NoError);
    assert_eq!(device.counters().drains, 1);
    assert_eq!(device.open_handles(), 0);
    assert!(sink.wait_for_drained(Duration::ZERO));
}

#[test]
fn test_stop_from_idle_skips_drain() {
    let (device, sink) = setup();
    let _writer = sink.start_push().unwrap();

    sink.stop();

    assert_eq!(device.counters().drains, 0);
    assert_eq!(device.open_handles(), 0);
}

#[test]
fn test_reset_drops_pending_frames() {
    let (device, sink) = setup();
    let mut writer = sink.start_push().unwrap();
    writer.write(&[0u8; 16]).unwrap();

    sink.reset();

    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(device.counters().drops, 1);
    assert_eq!(device.counters().drains, 0);
    assert_eq!(device.queued(), 0);
    assert_eq!(device.open_handles(), 0);
}

#[test]
fn test_format_is_fixed_while_running() {
    let (_device, sink) = setup();
    let _writer = sink.start_push().unwrap();

    let result = sink.set_format(AudioFormat::new(44100, 2, SampleFormat::I16));
    assert!(matches!(result, Err(AudioError::NotStopped)));
    assert_eq!(sink.format(), AudioFormat::new(8000, 1, SampleFormat::I16));

    sink.stop();
    assert!(sink
        .set_format(AudioFormat::new(44100, 2, SampleFormat::I16))
        .is_ok());
}

#[test]
fn test_volume_is_clamped_and_applied() {
    let (device, sink) = setup();
    sink.set_volume(1.5);
    assert_eq!(sink.volume(), 1.0);
    sink.set_volume(-0.5);
    assert_eq!(sink.volume(), 0.0);
    sink.set_volume(0.5);

    let mut writer = sink.start_push().unwrap();
    let mut data = Vec::new();
    for s in [1000i16, -1000] {
        data.extend_from_slice(&s.to_ne_bytes());
    }
    writer.write(&data).unwrap();

    let played = device.played();
    let samples: Vec<i16> = played
        .chunks_exact(2)
        .map(|c| i16::from_ne_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(samples, vec![500, -500]);
}

#[test]
fn test_processed_usecs_counts_written_frames() {
    let (_device, sink) = setup();
    let mut writer = sink.start_push().unwrap();

    // 8 frames at 8 kHz
    writer.write(&[0u8; 16]).unwrap();
    assert_eq!(sink.processed_usecs(), 1000);

    // Restart resets the counter
    let _writer = sink.start_push().unwrap();
    assert_eq!(sink.processed_usecs(), 0);
}

#[test]
fn test_buffer_and_period_sizes() {
    let (_device, sink) = setup();

    // 100 ms / 20 ms at 8 kHz mono 16-bit before start
    assert_eq!(sink.buffer_size(), 1600);
    assert_eq!(sink.period_size(), 320);

    sink.set_buffer_size(640);
    assert_eq!(sink.buffer_size(), 640);

    // Negotiated geometry while running
    let _writer = sink.start_push().unwrap();
    assert_eq!(sink.buffer_size(), 32);
    assert_eq!(sink.period_size(), 8);
    assert_eq!(sink.bytes_free(), 32);
}

#[test]
fn test_bytes_free_zero_when_stopped() {
    let (_device, sink) = setup();
    assert_eq!(sink.bytes_free(), 0);
}

#[test]
fn test_unrecoverable_error_is_fatal() {
    let (device, sink) = setup();
    sink.start(Cursor::new(vec![0u8; 64])).unwrap();
    device.fail_next(MockOp::Avail, HwError::EINVAL);

    assert!(!sink.tick());
    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(sink.error(), StreamError::FatalError);
    assert_eq!(device.open_handles(), 0);
}

#[test]
fn test_drop_releases_hardware() {
    let device = MockDevice::new(16, 4);
    {
        let sink = AudioSink::new(device.clone(), StreamConfig::manual()).unwrap();
        let _writer = sink.start_push().unwrap();
        assert_eq!(device.open_handles(), 1);
    }
    assert_eq!(device.open_handles(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = StreamConfig {
        period_time_us: 0,
        ..StreamConfig::manual()
    };
    let result = AudioSink::new(MockDevice::new(16, 4), config);
    assert!(matches!(result, Err(AudioError::InvalidConfig(_))));
}

#[test]
fn test_timer_mode_drives_the_pump() {
    let (device, sink) = setup_with(StreamConfig::default());
    sink.start(std::io::repeat(0)).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while device.played().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!device.played().is_empty());

    sink.stop();
    assert_eq!(sink.state(), StreamState::Stopped);
    assert_eq!(device.open_handles(), 0);
}
