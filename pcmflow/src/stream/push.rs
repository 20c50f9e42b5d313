use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::audio::device::PcmDevice;
use crate::pump::{CapturePump, PlaybackPump, StreamShared};

fn detached() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "stream is no longer running")
}

/// Write endpoint of a push-mode [`AudioSink`](super::AudioSink)
///
/// Only whole frames are written. When the hardware is full the writer retries
/// after `push_retry_delay`; once `push_write_retries` attempts in a row made
/// no progress the stream is stopped with `FatalError` and the partial count
/// is returned, which may be zero.
///
/// The writer detaches when the stream is stopped or started again; writes
/// made after that fail with `NotConnected`.
pub struct PushWriter<D: PcmDevice> {
    shared: Weak<StreamShared<D, PlaybackPump>>,
    epoch: u64,
}

impl<D: PcmDevice> PushWriter<D> {
    pub(crate) fn new(shared: Weak<StreamShared<D, PlaybackPump>>, epoch: u64) -> Self {
        Self { shared, epoch }
    }

    fn attached(&self) -> Option<Arc<StreamShared<D, PlaybackPump>>> {
        let shared = self.shared.upgrade()?;
        let core = &shared.core;
        (core.epoch() == self.epoch && core.machine().is_active_or_idle()).then_some(shared)
    }

    /// Whether writes still reach the stream
    pub fn is_attached(&self) -> bool {
        self.attached().is_some()
    }
}

impl<D: PcmDevice> Write for PushWriter<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let shared = self.attached().ok_or_else(detached)?;
        let core = &shared.core;
        let config = core.config();

        let len = core.format().align_down(buf.len());
        let mut written = 0;
        let mut stalled = 0;
        let mut gave_up = false;

        while written < len {
            let Some(n) = core.write_frames(&buf[written..len]) else {
                break;
            };
            if n > 0 {
                written += n;
                stalled = 0;
                continue;
            }

            stalled += 1;
            if stalled > config.push_write_retries {
                core.fail_stalled(config.push_write_retries);
                gave_up = true;
                break;
            }
            std::thread::sleep(config.push_retry_delay());
        }

        trace!(requested = buf.len(), written, "Push write");
        if written == 0 && !gave_up && !core.machine().is_active_or_idle() {
            return Err(detached());
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read endpoint of a push-mode [`AudioSource`](super::AudioSource)
///
/// Returns captured bytes buffered by the pump, filling from the hardware
/// first when nothing is buffered. An empty read on a running stream is
/// `WouldBlock`; a stopped stream reads as end of stream.
pub struct PushReader<D: PcmDevice> {
    shared: Weak<StreamShared<D, CapturePump>>,
    epoch: u64,
}

impl<D: PcmDevice> PushReader<D> {
    pub(crate) fn new(shared: Weak<StreamShared<D, CapturePump>>, epoch: u64) -> Self {
        Self { shared, epoch }
    }

    fn attached(&self) -> Option<Arc<StreamShared<D, CapturePump>>> {
        let shared = self.shared.upgrade()?;
        let core = &shared.core;
        (core.epoch() == self.epoch && core.machine().is_active_or_idle()).then_some(shared)
    }

    /// Whether reads still come from the stream
    pub fn is_attached(&self) -> bool {
        self.attached().is_some()
    }
}

impl<D: PcmDevice> Read for PushReader<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(shared) = self.attached() else {
            debug!("Push read on detached stream");
            return Ok(0);
        };
        let core = &shared.core;
        let len = core.format().align_down(buf.len());
        if len == 0 {
            return Ok(0);
        }

        let mut pump = shared.pump.lock();
        if pump.buffered() == 0 && pump.fill(core).is_none() {
            return Ok(0);
        }

        let n = pump.read_buffered(&mut buf[..len]);
        drop(pump);

        trace!(requested = buf.len(), read = n, "Push read");
        if n == 0 {
            return Err(ErrorKind::WouldBlock.into());
        }
        Ok(n)
    }
}
