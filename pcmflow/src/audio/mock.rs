//! In-memory PCM backend
//!
//! `MockDevice` simulates a hardware ring: playback bytes accumulate until
//! [`MockDevice::consume`] plays them, capture bytes are queued with
//! [`MockDevice::feed`]. Errors can be scripted per operation. Clones share the
//! same simulated hardware, so a test keeps one clone to drive and inspect it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::audio::device::{Direction, HwParams, PcmDevice, PcmHandle};
use crate::audio::error::HwError;
use crate::audio::format::AudioFormat;
use crate::state::config::StreamConfig;

/// Operation an error can be scripted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Open,
    Write,
    Read,
    Avail,
    Prepare,
    Start,
    Resume,
    DropPending,
    Drain,
}

/// Call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCounters {
    pub opens: usize,
    pub closes: usize,
    pub prepares: usize,
    pub starts: usize,
    pub resumes: usize,
    pub drops: usize,
    pub drains: usize,
}

#[derive(Debug)]
struct MockHardware {
    params: HwParams,
    bytes_per_frame: usize,
    direction: Direction,
    /// Playback bytes waiting to be played
    queued: usize,
    /// Everything accepted by playback writes
    played: Vec<u8>,
    /// Captured bytes waiting to be read
    capture: VecDeque<u8>,
    /// Upper bound on bytes accepted per write, for short-write scenarios
    write_limit: Option<usize>,
    errors: HashMap<MockOp, VecDeque<HwError>>,
    counters: MockCounters,
    open_handles: usize,
}

impl MockHardware {
    fn buffer_bytes(&self) -> usize {
        self.params.buffer_frames * self.bytes_per_frame
    }

    fn take_error(&mut self, op: MockOp) -> Result<(), HwError> {
        match self.errors.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => {
                debug!(?op, code = err.code, "Mock device returning scripted error");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// Scriptable PCM device
#[derive(Debug, Clone)]
pub struct MockDevice {
    name: String,
    hw: Arc<Mutex<MockHardware>>,
}

impl MockDevice {
    /// Create a device with the given buffer geometry (in frames)
    pub fn new(buffer_frames: usize, period_frames: usize) -> Self {
        Self {
            name: "mock".to_string(),
            hw: Arc::new(Mutex::new(MockHardware {
                params: HwParams {
                    buffer_frames,
                    period_frames,
                },
                bytes_per_frame: 1,
                direction: Direction::Playback,
                queued: 0,
                played: Vec::new(),
                capture: VecDeque::new(),
                write_limit: None,
                errors: HashMap::new(),
                counters: MockCounters::default(),
                open_handles: 0,
            })),
        }
    }

    /// Queue `code` as the result of the next call to `op`
    pub fn fail_next(&self, op: MockOp, code: i32) {
        self.hw
            .lock()
            .errors
            .entry(op)
            .or_default()
            .push_back(HwError::new(code));
    }

    /// Queue `code` for the next `times` calls to `op`
    pub fn fail_times(&self, op: MockOp, code: i32, times: usize) {
        for _ in 0..times {
            self.fail_next(op, code);
        }
    }

    /// Play back up to `bytes` of queued playback data
    pub fn consume(&self, bytes: usize) {
        let mut hw = self.hw.lock();
        hw.queued = hw.queued.saturating_sub(bytes);
    }

    /// Play back everything queued
    pub fn consume_all(&self) {
        self.hw.lock().queued = 0;
    }

    /// Make captured bytes available for reading
    pub fn feed(&self, data: &[u8]) {
        self.hw.lock().capture.extend(data.iter().copied());
    }

    /// Limit how many bytes a single write accepts
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.hw.lock().write_limit = limit;
    }

    /// Bytes accepted by playback writes so far
    pub fn played(&self) -> Vec<u8> {
        self.hw.lock().played.clone()
    }

    /// Playback bytes not yet consumed
    pub fn queued(&self) -> usize {
        self.hw.lock().queued
    }

    pub fn counters(&self) -> MockCounters {
        self.hw.lock().counters
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.hw.lock().open_handles
    }
}

impl PcmDevice for MockDevice {
    type Handle = MockHandle;

    fn name(&self) -> &str {
        &self.name
    }

    fn open(
        &self,
        direction: Direction,
        format: &AudioFormat,
        _config: &StreamConfig,
    ) -> Result<MockHandle, HwError> {
        let mut hw = self.hw.lock();
        hw.counters.opens += 1;
        hw.take_error(MockOp::Open)?;

        hw.bytes_per_frame = format.bytes_per_frame();
        hw.direction = direction;
        hw.queued = 0;
        hw.open_handles += 1;

        Ok(MockHandle {
            hw: Arc::clone(&self.hw),
        })
    }
}

/// Handle returned by [`MockDevice::open`]
#[derive(Debug)]
pub struct MockHandle {
    hw: Arc<Mutex<MockHardware>>,
}

impl PcmHandle for MockHandle {
    fn params(&self) -> HwParams {
        self.hw.lock().params
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, HwError> {
        let mut hw = self.hw.lock();
        hw.take_error(MockOp::Write)?;

        let space = hw.buffer_bytes() - hw.queued;
        let mut n = data.len().min(space);
        if let Some(limit) = hw.write_limit {
            n = n.min(limit);
        }
        n -= n % hw.bytes_per_frame.max(1);

        hw.queued += n;
        hw.played.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HwError> {
        let mut hw = self.hw.lock();
        hw.take_error(MockOp::Read)?;

        let bpf = hw.bytes_per_frame.max(1);
        let mut n = buf.len().min(hw.capture.len());
        n -= n % bpf;
        for (dst, src) in buf[..n].iter_mut().zip(hw.capture.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn avail(&mut self) -> Result<usize, HwError> {
        let mut hw = self.hw.lock();
        hw.take_error(MockOp::Avail)?;

        let bpf = hw.bytes_per_frame.max(1);
        let bytes = match hw.direction {
            Direction::Playback => hw.buffer_bytes() - hw.queued,
            Direction::Capture => hw.capture.len().min(hw.buffer_bytes()),
        };
        Ok(bytes - bytes % bpf)
    }

    fn prepare(&mut self) -> Result<(), HwError> {
        let mut hw = self.hw.lock();
        hw.counters.prepares += 1;
        hw.take_error(MockOp::Prepare)
    }

    fn start(&mut self) -> Result<(), HwError> {
        let mut hw = self.hw.lock();
        hw.counters.starts += 1;
        hw.take_error(MockOp::Start)
    }

    fn resume(&mut self) -> Result<(), HwError> {
        let mut hw = self.hw.lock();
        hw.counters.resumes += 1;
        hw.take_error(MockOp::Resume)
    }

    fn drop_pending(&mut self) -> Result<(), HwError> {
        let mut hw = self.hw.lock();
        hw.counters.drops += 1;
        hw.take_error(MockOp::DropPending)?;
        hw.queued = 0;
        hw.capture.clear();
        Ok(())
    }

    fn drain(&mut self) -> Result<(), HwError> {
        let mut hw = self.hw.lock();
        hw.counters.drains += 1;
        hw.take_error(MockOp::Drain)?;
        hw.queued = 0;
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut hw = self.hw.lock();
        hw.counters.closes += 1;
        hw.open_handles = hw.open_handles.saturating_sub(1);
    }
}
