use std::io::{ErrorKind, Read};

use tracing::trace;

use crate::audio::device::PcmDevice;
use crate::pump::stream_core::StreamCore;
use crate::pump::StreamPump;
use crate::state::StreamState;

/// Application-supplied playback data for pull mode
///
/// `Ok(0)` and `WouldBlock` both mean "nothing right now"; any other error
/// stops the stream with `IOError`.
pub type PullSource = Box<dyn Read + Send>;

/// Playback half of the pump
///
/// In pull mode it reads from the client into a staging buffer and writes
/// whole frames to hardware. Bytes the hardware did not take stay staged for
/// the next tick. In push mode it only watches for starvation; the push
/// writer feeds the hardware directly.
pub struct PlaybackPump {
    source: Option<PullSource>,
    staging: Vec<u8>,
    staged: usize,
}

impl PlaybackPump {
    pub fn new() -> Self {
        Self {
            source: None,
            staging: Vec::new(),
            staged: 0,
        }
    }

    /// Prepare for a new run; `None` selects push mode
    pub fn arm(&mut self, source: Option<PullSource>, buffer_bytes: usize) {
        self.source = source;
        self.staging.clear();
        self.staging.resize(buffer_bytes, 0);
        self.staged = 0;
    }

    pub fn is_pull(&self) -> bool {
        self.source.is_some()
    }

    /// Bytes read from the client but not yet written
    pub fn staged(&self) -> usize {
        self.staged
    }
}

impl Default for PlaybackPump {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: PcmDevice> StreamPump<D> for PlaybackPump {
    fn tick(&mut self, core: &StreamCore<D>) -> bool {
        match core.machine().state() {
            StreamState::Stopped => {
                StreamPump::<D>::reset(self);
                return false;
            }
            StreamState::Suspended => return true,
            StreamState::Active | StreamState::Idle => {}
        }

        let Some((buffer_bytes, period_bytes)) = core.hw_geometry() else {
            return true;
        };
        let Some(free) = core.avail() else {
            StreamPump::<D>::reset(self);
            return false;
        };
        let starving = free > buffer_bytes.saturating_sub(period_bytes);

        let Some(source) = self.source.as_mut() else {
            if starving {
                core.report_underrun();
            }
            return true;
        };

        if free < period_bytes {
            return true;
        }

        let format = core.format();
        let want = format.align_down(free.min(self.staging.len()));
        if self.staged < want {
            match source.read(&mut self.staging[self.staged..want]) {
                Ok(n) => self.staged += n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => {
                    core.fail_client(&e);
                    StreamPump::<D>::reset(self);
                    return false;
                }
            }

            // the client read may block long enough for the stream to change
            let state = core.machine().state();
            if !state.is_running() {
                return !state.is_stopped();
            }
        }

        let ready = format.align_down(self.staged);
        if ready == 0 {
            if starving {
                core.report_underrun();
            }
            return true;
        }

        let Some(written) = core.write_frames(&self.staging[..ready]) else {
            StreamPump::<D>::reset(self);
            return false;
        };
        trace!(written, staged = self.staged, free, "Playback tick");

        self.staging.copy_within(written..self.staged, 0);
        self.staged -= written;
        true
    }

    fn reset(&mut self) {
        self.source = None;
        self.staged = 0;
    }
}
