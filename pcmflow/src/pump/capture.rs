use std::io::{ErrorKind, Write};

use tracing::trace;

use crate::audio::buffer::RingBuffer;
use crate::audio::device::PcmDevice;
use crate::pump::stream_core::StreamCore;
use crate::pump::StreamPump;
use crate::state::{RunningState, StreamState};

/// Application-supplied destination for captured data in pull mode
///
/// `Ok(0)` and `WouldBlock` mean "full for now"; any other error stops the
/// stream with `IOError`.
pub type PullSink = Box<dyn Write + Send>;

/// Capture half of the pump
///
/// Each tick moves ready frames from hardware into the ring buffer, then in
/// pull mode drains the ring into the client. The ring is sized to the
/// negotiated hardware buffer.
pub struct CapturePump {
    sink: Option<PullSink>,
    ring: RingBuffer,
    scratch: Vec<u8>,
}

impl CapturePump {
    pub fn new() -> Self {
        Self {
            sink: None,
            ring: RingBuffer::default(),
            scratch: Vec::new(),
        }
    }

    /// Prepare for a new run; `None` selects push mode
    pub fn arm(&mut self, sink: Option<PullSink>, buffer_bytes: usize) {
        self.sink = sink;
        self.ring.resize(buffer_bytes);
        self.ring.clear();
        self.scratch.clear();
        self.scratch.resize(buffer_bytes, 0);
    }

    pub fn is_pull(&self) -> bool {
        self.sink.is_some()
    }

    /// Bytes captured but not yet handed to the application
    pub fn buffered(&self) -> usize {
        self.ring.bytes_of_data_in_buffer()
    }

    /// Move ready frames from hardware into the ring
    ///
    /// `None` once the stream has stopped on an unrecoverable fault.
    pub fn fill<D: PcmDevice>(&mut self, core: &StreamCore<D>) -> Option<usize> {
        let format = core.format();
        let room = format.align_down(self.ring.free_bytes().min(self.scratch.len()));
        if room == 0 {
            return Some(0);
        }

        let n = core.read_frames(&mut self.scratch[..room])?;
        self.ring.write(&self.scratch[..n]);
        Some(n)
    }

    /// Copy buffered bytes into `out`
    pub fn read_buffered(&mut self, out: &mut [u8]) -> usize {
        self.ring.read(out)
    }

    /// Drain the ring into the pull client; `Err` when the client failed
    fn deliver(&mut self) -> std::io::Result<usize> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(0);
        };

        let mut delivered = 0;
        loop {
            let block = self.ring.available_data();
            if block.is_empty() {
                break;
            }
            match sink.write(block) {
                Ok(0) => break,
                Ok(n) => {
                    self.ring.read_bytes(n);
                    delivered += n;
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(delivered)
    }
}

impl Default for CapturePump {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: PcmDevice> StreamPump<D> for CapturePump {
    fn tick(&mut self, core: &StreamCore<D>) -> bool {
        match core.machine().state() {
            StreamState::Stopped => {
                StreamPump::<D>::reset(self);
                return false;
            }
            StreamState::Suspended => return true,
            StreamState::Active | StreamState::Idle => {}
        }

        let Some(captured) = self.fill(core) else {
            StreamPump::<D>::reset(self);
            return false;
        };

        let delivered = match self.deliver() {
            Ok(n) => n,
            Err(e) => {
                core.fail_client(&e);
                StreamPump::<D>::reset(self);
                return false;
            }
        };
        trace!(captured, delivered, buffered = self.buffered(), "Capture tick");

        let state = core.machine().state();
        if !state.is_running() {
            return !state.is_stopped();
        }

        if captured > 0 || delivered > 0 {
            core.mark_running(RunningState::Active);
        } else {
            core.mark_running(RunningState::Idle);
        }
        true
    }

    fn reset(&mut self) {
        self.sink = None;
        self.ring.clear();
    }
}
