use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::device::{Direction, PcmDevice, PcmHandle};
use crate::audio::error::AudioResult;
use crate::audio::format::AudioFormat;
use crate::pump::PlaybackPump;
use crate::state::{RunningState, StreamConfig, StreamError, StreamEvent, StreamState};
use crate::stream::push::PushWriter;
use crate::stream::StreamBase;

/// Playback stream
///
/// In pull mode the pump reads from the application's reader whenever a
/// period of hardware space is free. In push mode the application writes
/// through a [`PushWriter`].
///
/// # Example
/// ```
/// use pcmflow::audio::MockDevice;
/// use pcmflow::state::{StreamConfig, StreamState};
/// use pcmflow::stream::AudioSink;
///
/// let device = MockDevice::new(64, 16);
/// let sink = AudioSink::new(device.clone(), StreamConfig::manual()).unwrap();
///
/// sink.start(std::io::repeat(0)).unwrap();
/// assert!(sink.tick());
/// assert_eq!(sink.state(), StreamState::Active);
///
/// sink.stop();
/// assert_eq!(sink.state(), StreamState::Stopped);
/// ```
pub struct AudioSink<D: PcmDevice> {
    base: StreamBase<D, PlaybackPump>,
}

impl<D: PcmDevice> AudioSink<D> {
    /// Create a stopped sink on `device`
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` does not validate
    pub fn new(device: D, config: StreamConfig) -> AudioResult<Self> {
        Ok(Self {
            base: StreamBase::new(device, Direction::Playback, config, PlaybackPump::new())?,
        })
    }

    /// Start playing data pulled from `reader`
    ///
    /// A running stream is stopped first. On failure the stream stays
    /// stopped with `OpenError`.
    ///
    /// # Errors
    /// Returns error if the format is invalid or the device cannot be opened
    pub fn start<R>(&self, reader: R) -> AudioResult<()>
    where
        R: Read + Send + 'static,
    {
        self.restart_guard();
        let started = self
            .base
            .open(RunningState::Active, |pump, buffer_bytes| {
                pump.arm(Some(Box::new(reader)), buffer_bytes)
            })?;
        self.spawn_ticker(started.period_bytes)?;

        info!(
            "Audio sink started in pull mode ({} byte buffer, {} byte period)",
            started.buffer_bytes, started.period_bytes
        );
        Ok(())
    }

    /// Start in push mode and return the write endpoint
    ///
    /// The stream is Idle until the first bytes are written.
    ///
    /// # Errors
    /// Returns error if the format is invalid or the device cannot be opened
    pub fn start_push(&self) -> AudioResult<PushWriter<D>> {
        self.restart_guard();
        let started = self
            .base
            .open(RunningState::Idle, |pump, buffer_bytes| {
                pump.arm(None, buffer_bytes)
            })?;
        self.spawn_ticker(started.period_bytes)?;

        info!(
            "Audio sink started in push mode ({} byte buffer, {} byte period)",
            started.buffer_bytes, started.period_bytes
        );
        Ok(PushWriter::new(Arc::downgrade(&self.base.shared), started.epoch))
    }

    /// Stop playback, letting queued frames play out first
    ///
    /// Draining only happens when the stream was Active. Other stop or start
    /// requests fail while the drain is in progress.
    pub fn stop(&self) {
        let core = self.base.core();
        let draining = match core.machine().stop(StreamError::NoError, true, false) {
            Some(notifier) => notifier.is_draining(),
            None => false,
        };

        self.base.stop_ticker();

        if draining {
            if let Some(mut slot) = core.release_hw() {
                debug!("Draining playback buffer");
                if let Err(e) = slot.handle.drain() {
                    warn!(code = e.code, "Drain failed, dropping pending frames");
                }
            }
            core.machine().on_drained();
        } else {
            core.close_hw();
        }

        self.base.shared.try_reset();
        info!("Audio sink stopped");
    }

    /// Discard queued frames and stop immediately
    pub fn reset(&self) {
        let core = self.base.core();
        if let Some(Err(e)) = core.with_handle(|handle| handle.drop_pending()) {
            warn!(code = e.code, "Failed to drop pending frames");
        }
        self.base.halt();
        info!("Audio sink reset");
    }

    /// Pause playback; queued frames are played out first
    pub fn suspend(&self) {
        let core = self.base.core();
        let Some(notifier) = core.machine().suspend() else {
            return;
        };
        drop(notifier);

        if let Some(Err(e)) = core.with_handle(|handle| handle.drain()) {
            warn!(code = e.code, "Drain on suspend failed");
        }
        info!("Audio sink suspended");
    }

    /// Return to the state held before [`suspend`](Self::suspend)
    pub fn resume(&self) {
        let core = self.base.core();
        let Some(notifier) = core.machine().resume() else {
            return;
        };
        drop(notifier);

        core.set_resuming(true);
        if core.restart_hw() {
            info!("Audio sink resumed");
        }
    }

    /// Run one pump tick; `false` once the stream has stopped
    ///
    /// Needed with `TickMode::Manual`, harmless otherwise.
    pub fn tick(&self) -> bool {
        self.base.tick()
    }

    /// Wait for a draining stop to finish
    ///
    /// Gives up the drain after `timeout`.
    pub fn wait_for_drained(&self, timeout: Duration) -> bool {
        self.base.core().machine().wait_for_drained(timeout)
    }

    /// Bytes the hardware can accept right now
    ///
    /// Reports one period while resuming from suspend, 0 when not running.
    pub fn bytes_free(&self) -> usize {
        let core = self.base.core();
        if !core.machine().is_active_or_idle() {
            return 0;
        }
        if core.is_resuming() {
            return core.period_size();
        }
        core.avail().unwrap_or(0)
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

    /// Set the playback volume, clamped to [0, 1]
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

    /// Microseconds of audio written to the hardware since start
    pub fn processed_usecs(&self) -> u64 {
        self.base.core().processed_usecs()
    }

    fn restart_guard(&self) {
        if !self.state().is_stopped() {
            debug!("Restarting running sink");
            self.base.halt();
        }
    }

    fn spawn_ticker(&self, period_bytes: usize) -> AudioResult<()> {
        let interval = Duration::from_micros(self.format().duration_for_bytes(period_bytes));
        self.base.start_ticker(interval)
    }
}

impl<D: PcmDevice> Drop for AudioSink<D> {
    fn drop(&mut self) {
        if !self.state().is_stopped() || self.base.core().has_handle() {
            self.base.halt();
        }
    }
}
