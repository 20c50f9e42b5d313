use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::device::{Direction, PcmDevice, PcmHandle};
use crate::audio::error::AudioResult;
use crate::audio::format::AudioFormat;
use crate::pump::CapturePump;
use crate::state::{RunningState, StreamConfig, StreamError, StreamEvent, StreamState};
use crate::stream::push::PushReader;
use crate::stream::StreamBase;

/// Capture stream
///
/// Every tick moves ready frames from the hardware into a ring buffer sized
/// to the hardware buffer. In pull mode the pump then hands them to the
/// application's writer; in push mode the application reads them through a
/// [`PushReader`].
pub struct AudioSource<D: PcmDevice> {
    base: StreamBase<D, CapturePump>,
}

impl<D: PcmDevice> AudioSource<D> {
    /// Create a stopped source on `device`
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` does not validate
    pub fn new(device: D, config: StreamConfig) -> AudioResult<Self> {
        Ok(Self {
            base: StreamBase::new(device, Direction::Capture, config, CapturePump::new())?,
        })
    }

    /// Start capturing into `writer`
    ///
    /// # Errors
    /// Returns error if the format is invalid or the device cannot be opened
    pub fn start<W>(&self, writer: W) -> AudioResult<()>
    where
        W: Write + Send + 'static,
    {
        self.restart_guard();
        let started = self
            .base
            .open(RunningState::Active, |pump, buffer_bytes| {
                pump.arm(Some(Box::new(writer)), buffer_bytes)
            })?;
        self.spawn_ticker(started.buffer_bytes)?;

        info!(
            "Audio source started in pull mode ({} byte buffer, {} byte period)",
            started.buffer_bytes, started.period_bytes
        );
        Ok(())
    }

    /// Start in push mode and return the read endpoint
    ///
    /// # Errors
    /// Returns error if the format is invalid or the device cannot be opened
    pub fn start_push(&self) -> AudioResult<PushReader<D>> {
        self.restart_guard();
        let started = self
            .base
            .open(RunningState::Idle, |pump, buffer_bytes| {
                pump.arm(None, buffer_bytes)
            })?;
        self.spawn_ticker(started.buffer_bytes)?;

        info!(
            "Audio source started in push mode ({} byte buffer, {} byte period)",
            started.buffer_bytes, started.period_bytes
        );
        Ok(PushReader::new(Arc::downgrade(&self.base.shared), started.epoch))
    }

    /// Stop capturing; pending hardware frames are discarded
    pub fn stop(&self) {
        let core = self.base.core();
        drop(core.machine().stop(StreamError::NoError, false, false));
        self.base.stop_ticker();

        if let Some(Err(e)) = core.with_handle(|handle| handle.drop_pending()) {
            debug!(code = e.code, "Failed to drop pending capture frames");
        }
        core.close_hw();
        self.base.shared.try_reset();
        info!("Audio source stopped");
    }

    /// Same as [`stop`](Self::stop); capture has nothing to drain
    pub fn reset(&self) {
        self.stop();
    }

    /// Pause capturing and discard what the hardware holds
    pub fn suspend(&self) {
        let core = self.base.core();
        let Some(notifier) = core.machine().suspend() else {
            return;
        };
        drop(notifier);

        if let Some(Err(e)) = core.with_handle(|handle| handle.drop_pending()) {
            warn!(code = e.code, "Failed to drop pending frames on suspend");
        }
        info!("Audio source suspended");
    }

    /// Return to the state held before [`suspend`](Self::suspend)
    pub fn resume(&self) {
        let core = self.base.core();
        let Some(notifier) = core.machine().resume() else {
            return;
        };
        drop(notifier);

        if core.restart_hw() {
            info!("Audio source resumed");
        }
    }

    /// Run one pump tick; `false` once the stream has stopped
    pub fn tick(&self) -> bool {
        self.base.tick()
    }

    /// Captured bytes the application can read right now
    ///
    /// Counts both the pump buffer and frames still held by the hardware.
    pub fn bytes_ready(&self) -> usize {
        let core = self.base.core();
        if !core.machine().is_active_or_idle() {
            return 0;
        }
        let buffered = self.base.shared.pump.lock().buffered();
        buffered + core.avail().unwrap_or(0)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        self.base.subscribe()
    }

    pub fn state(&self) -> StreamState {
        self.base.core().machine().state()
    }

    pub fn error(&self) -> StreamError {
        self.base.core().machine().error()
    }

    pub fn format(&self) -> AudioFormat {
        self.base.core().format()
    }

    /// Set the format for the next start
    ///
    /// # Errors
    /// Returns `NotStopped` unless the stream is stopped
    pub fn set_format(&self, format: AudioFormat) -> AudioResult<()> {
        self.base.set_format(format)
    }

    pub fn volume(&self) -> f32 {
        self.base.core().volume()
    }

    /// Set the capture gain, clamped to [0, 1]
    pub fn set_volume(&self, volume: f32) {
        self.base.core().set_volume(volume);
    }

    pub fn buffer_size(&self) -> usize {
        self.base.core().buffer_size()
    }

    /// Request a hardware buffer size in bytes; takes effect on the next start
    pub fn set_buffer_size(&self, bytes: usize) {
        self.base.core().set_buffer_size(bytes);
    }

    pub fn period_size(&self) -> usize {
        self.base.core().period_size()
    }

    /// Microseconds of audio read from the hardware since start
    pub fn processed_usecs(&self) -> u64 {
        self.base.core().processed_usecs()
    }

    fn restart_guard(&self) {
        if !self.state().is_stopped() {
            debug!("Restarting running source");
            self.base.halt();
        }
    }

    /// Ticks at half the buffer time
    fn spawn_ticker(&self, buffer_bytes: usize) -> AudioResult<()> {
        let interval = Duration::from_micros(self.format().duration_for_bytes(buffer_bytes) / 2);
        self.base.start_ticker(interval)
    }
}

impl<D: PcmDevice> Drop for AudioSource<D> {
    fn drop(&mut self) {
        if !self.state().is_stopped() || self.base.core().has_handle() {
            self.base.halt();
        }
    }
}
