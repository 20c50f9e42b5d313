//! Application-facing streams
//!
//! [`AudioSink`] plays bytes to a [`PcmDevice`], [`AudioSource`] captures from
//! one. Each can run in pull mode, where the pump talks to a client reader or
//! writer, or in push mode, where the application gets a [`PushWriter`] or
//! [`PushReader`] endpoint.

mod push;
mod sink;
mod source;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::audio::device::{Direction, PcmDevice};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::format::AudioFormat;
use crate::pump::{spawn_ticker, StreamCore, StreamPump, StreamShared, Ticker};
use crate::state::{RunningState, StreamConfig, StreamError, StreamEvent, TickMode};

pub use push::{PushReader, PushWriter};
pub use sink::AudioSink;
pub use source::AudioSource;

/// Hardware geometry of a freshly started run
#[derive(Debug, Clone, Copy)]
struct Started {
    epoch: u64,
    buffer_bytes: usize,
    period_bytes: usize,
}

/// Lifecycle plumbing shared by sink and source
struct StreamBase<D: PcmDevice, P> {
    shared: Arc<StreamShared<D, P>>,
    ticker: Mutex<Option<Ticker>>,
}

impl<D: PcmDevice, P: StreamPump<D>> StreamBase<D, P> {
    fn new(device: D, direction: Direction, config: StreamConfig, pump: P) -> AudioResult<Self> {
        config
            .validate()
            .map_err(|e| AudioError::InvalidConfig(e.to_string()))?;

        info!(
            "Creating {} stream on device '{}'",
            direction.name(),
            device.name()
        );

        let core = StreamCore::new(device, direction, config);
        Ok(Self {
            shared: Arc::new(StreamShared::new(core, pump)),
            ticker: Mutex::new(None),
        })
    }

    fn core(&self) -> &StreamCore<D> {
        &self.shared.core
    }

    /// Open the hardware, arm the pump and enter `running`
    ///
    /// The pump lock is held across arming and the state change so a
    /// concurrent tick never sees a half-armed run.
    fn open<F>(&self, running: RunningState, arm: F) -> AudioResult<Started>
    where
        F: FnOnce(&mut P, usize),
    {
        let core = self.core();
        let machine = core.machine();
        let format = core.format();

        if !format.is_valid() {
            error!(?format, "Refusing to start with invalid format");
            machine.set_error(StreamError::OpenError);
            return Err(AudioError::InvalidFormat(format));
        }

        let slot = core.open_slot().map_err(|source| {
            error!(device = core.device().name(), code = source.code, "Failed to open PCM device");
            machine.set_error(StreamError::OpenError);
            AudioError::OpenFailed {
                device: core.device().name().to_string(),
                source,
            }
        })?;

        let buffer_bytes = slot.buffer_bytes;
        let period_bytes = slot.period_bytes;
        core.install(slot);

        let mut pump = self.shared.pump.lock();
        arm(&mut pump, buffer_bytes);
        let epoch = core.next_epoch();

        if machine.start(running).is_none() {
            pump.reset();
            drop(pump);
            core.close_hw();
            return Err(AudioError::NotStopped);
        }
        drop(pump);

        Ok(Started {
            epoch,
            buffer_bytes,
            period_bytes,
        })
    }

    /// Spawn the ticker thread when the stream is timer driven
    fn start_ticker(&self, interval: Duration) -> AudioResult<()> {
        let core = self.core();
        if core.config().tick_mode != TickMode::Timer {
            return Ok(());
        }

        match spawn_ticker(&self.shared, interval) {
            Ok(ticker) => {
                *self.ticker.lock() = Some(ticker);
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn pump thread: {}", e);
                core.close_hw();
                drop(core.machine().stop_or_update_error(StreamError::OpenError));
                Err(e)
            }
        }
    }

    fn stop_ticker(&self) {
        let ticker = self.ticker.lock().take();
        if let Some(mut ticker) = ticker {
            ticker.stop();
        }
    }

    /// Stop without draining and release everything
    fn halt(&self) {
        drop(self.core().machine().stop(StreamError::NoError, false, false));
        self.stop_ticker();
        self.core().close_hw();
        self.shared.try_reset();
    }

    fn tick(&self) -> bool {
        self.shared.tick()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        self.core().machine().subscribe()
    }

    fn set_format(&self, format: AudioFormat) -> AudioResult<()> {
        self.core().set_format(format)
    }
}
