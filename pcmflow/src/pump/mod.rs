//! Streaming pump
//!
//! One pump per stream, invoked once per tick by a [`ticker::Ticker`] thread
//! or by the host (`TickMode::Manual`). Ticks never overlap: the pump state
//! lives behind a mutex in [`StreamShared`].
//!
//! Lock order is pump, then hardware. Application code never takes the pump
//! lock while holding a state notifier.

/// Hardware access and fault routing
pub mod stream_core;

/// Capture pump
pub mod capture;

/// Playback pump
pub mod playback;

/// Fault recovery policy
pub mod recovery;

/// Tick thread
pub mod ticker;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::device::PcmDevice;
use crate::audio::error::{AudioError, AudioResult};

pub use stream_core::{HwSlot, StreamCore};
pub use capture::{CapturePump, PullSink};
pub use playback::{PlaybackPump, PullSource};
pub use recovery::{RecoveryAction, RecoveryPolicy};
pub use ticker::Ticker;

/// One transfer tick
pub trait StreamPump<D: PcmDevice>: Send + 'static {
    /// Move one tick worth of data; `false` once the stream has stopped
    fn tick(&mut self, core: &StreamCore<D>) -> bool;

    /// Drop the client and any buffered bytes
    fn reset(&mut self);
}

/// Core plus pump state, shared between a stream, its ticker and its push endpoint
pub struct StreamShared<D: PcmDevice, P> {
    pub core: StreamCore<D>,
    pub pump: Mutex<P>,
}

impl<D: PcmDevice, P: StreamPump<D>> StreamShared<D, P> {
    pub fn new(core: StreamCore<D>, pump: P) -> Self {
        Self {
            core,
            pump: Mutex::new(pump),
        }
    }

    /// Run one tick
    pub fn tick(&self) -> bool {
        self.pump.lock().tick(&self.core)
    }

    /// Reset the pump if no tick is in flight
    ///
    /// A tick that is running will see the stopped state and clean up itself.
    pub fn try_reset(&self) {
        if let Some(mut pump) = self.pump.try_lock() {
            pump.reset();
        }
    }
}

/// Start a ticker thread driving `shared` every `interval`
///
/// The thread only holds a weak reference, so it never keeps a dropped stream alive.
pub fn spawn_ticker<D, P>(shared: &Arc<StreamShared<D, P>>, interval: Duration) -> AudioResult<Ticker>
where
    D: PcmDevice,
    P: StreamPump<D>,
{
    let weak = Arc::downgrade(shared);
    let name = format!("pcmflow-{}", shared.core.direction().name());

    Ticker::spawn(&name, interval, move || match weak.upgrade() {
        Some(shared) => shared.tick(),
        None => false,
    })
    .map_err(AudioError::ThreadSpawn)
}
