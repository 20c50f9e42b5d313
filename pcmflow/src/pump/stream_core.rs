use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::device::{Direction, HwParams, PcmDevice, PcmHandle};
use crate::audio::error::{AudioError, AudioResult, HwError};
use crate::audio::format::{apply_volume, AudioFormat};
use crate::pump::recovery::{RecoveryAction, RecoveryPolicy};
use crate::state::config::StreamConfig;
use crate::state::{RunningState, StateMachine, StreamError, StreamState};

/// An open hardware handle with its byte geometry
pub struct HwSlot<H> {
    pub handle: H,
    pub params: HwParams,
    pub buffer_bytes: usize,
    pub period_bytes: usize,
}

impl<H: PcmHandle> HwSlot<H> {
    pub fn new(handle: H, format: &AudioFormat) -> Self {
        let params = handle.params();
        Self {
            buffer_bytes: format.bytes_for_frames(params.buffer_frames),
            period_bytes: format.bytes_for_frames(params.period_frames),
            handle,
            params,
        }
    }
}

/// State shared by a stream, its pump and its push endpoint
///
/// Owns the state machine, the current format and volume, and the hardware
/// handle. Every hardware call goes through here so that faults are routed
/// to the recovery policy and unrecoverable ones stop the stream exactly once.
///
/// Lock rule: no state transition is made while the hardware lock is held.
pub struct StreamCore<D: PcmDevice> {
    device: D,
    direction: Direction,
    config: StreamConfig,
    machine: StateMachine,
    format: ArcSwap<AudioFormat>,
    /// f32 bits
    volume: AtomicU32,
    hw: Mutex<Option<HwSlot<D::Handle>>>,
    recovery: RecoveryPolicy,
    processed_frames: AtomicU64,
    /// Bumped on every start so stale push endpoints can tell they are detached
    epoch: AtomicU64,
    resuming: AtomicBool,
    /// Buffer size requested through `set_buffer_size`, 0 when unset
    requested_buffer_bytes: AtomicUsize,
}

impl<D: PcmDevice> StreamCore<D> {
    pub fn new(device: D, direction: Direction, config: StreamConfig) -> Self {
        Self {
            recovery: RecoveryPolicy::from_config(&config),
            device,
            direction,
            config,
            machine: StateMachine::new(),
            format: ArcSwap::new(Arc::new(AudioFormat::default())),
            volume: AtomicU32::new(1.0f32.to_bits()),
            hw: Mutex::new(None),
            processed_frames: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            resuming: AtomicBool::new(false),
            requested_buffer_bytes: AtomicUsize::new(0),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn format(&self) -> AudioFormat {
        **self.format.load()
    }

    /// Change the format; only allowed while stopped
    pub fn set_format(&self, format: AudioFormat) -> AudioResult<()> {
        if !self.machine.state().is_stopped() {
            return Err(AudioError::NotStopped);
        }
        self.format.store(Arc::new(format));
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Set the volume, clamped to [0, 1]
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn processed_usecs(&self) -> u64 {
        self.format()
            .duration_for_frames(self.processed_frames.load(Ordering::Relaxed))
    }

    pub fn is_resuming(&self) -> bool {
        self.resuming.load(Ordering::Acquire)
    }

    pub(crate) fn set_resuming(&self, resuming: bool) {
        self.resuming.store(resuming, Ordering::Release);
    }

    /// Request a hardware buffer size for the next start
    pub fn set_buffer_size(&self, bytes: usize) {
        if self.machine.state().is_stopped() {
            self.requested_buffer_bytes.store(bytes, Ordering::Relaxed);
        }
    }

    /// Negotiated buffer size while running, requested size otherwise
    pub fn buffer_size(&self) -> usize {
        if let Some((buffer_bytes, _)) = self.hw_geometry() {
            return buffer_bytes;
        }
        match self.requested_buffer_bytes.load(Ordering::Relaxed) {
            0 => self.format().bytes_for_duration(self.config.buffer_time_us),
            bytes => bytes,
        }
    }

    pub fn period_size(&self) -> usize {
        match self.hw_geometry() {
            Some((_, period_bytes)) => period_bytes,
            None => self.format().bytes_for_duration(self.config.period_time_us),
        }
    }

    /// (buffer_bytes, period_bytes) of the open handle
    pub fn hw_geometry(&self) -> Option<(usize, usize)> {
        self.hw
            .lock()
            .as_ref()
            .map(|slot| (slot.buffer_bytes, slot.period_bytes))
    }

    pub fn has_handle(&self) -> bool {
        self.hw.lock().is_some()
    }

    /// Open, configure and prepare a new handle
    ///
    /// Open is retried up to `open_attempts` times. Capture handles are also
    /// started, playback handles start on the first write.
    pub fn open_slot(&self) -> Result<HwSlot<D::Handle>, HwError> {
        let format = self.format();
        let mut config = self.config.clone();
        let requested = self.requested_buffer_bytes.load(Ordering::Relaxed);
        if requested > 0 {
            config.buffer_time_us = format
                .duration_for_bytes(requested)
                .max(config.period_time_us);
        }

        let mut last_error = HwError::no_device();
        for attempt in 1..=self.config.open_attempts.max(1) {
            match self.device.open(self.direction, &format, &config) {
                Ok(handle) => {
                    let mut slot = HwSlot::new(handle, &format);
                    slot.handle.prepare()?;
                    if self.direction == Direction::Capture {
                        slot.handle.start()?;
                    }
                    info!(
                        device = self.device.name(),
                        direction = self.direction.name(),
                        buffer_bytes = slot.buffer_bytes,
                        period_bytes = slot.period_bytes,
                        "PCM device opened"
                    );
                    return Ok(slot);
                }
                Err(e) => {
                    warn!(
                        device = self.device.name(),
                        attempt,
                        code = e.code,
                        "Failed to open PCM device"
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub(crate) fn install(&self, slot: HwSlot<D::Handle>) {
        self.processed_frames.store(0, Ordering::Relaxed);
        self.resuming.store(false, Ordering::Release);
        *self.hw.lock() = Some(slot);
    }

    /// Detach the handle; dropping the returned slot closes it
    pub(crate) fn release_hw(&self) -> Option<HwSlot<D::Handle>> {
        self.hw.lock().take()
    }

    pub(crate) fn close_hw(&self) {
        if self.release_hw().is_some() {
            debug!(device = self.device.name(), "PCM device closed");
        }
    }

    /// Run `f` on the open handle
    pub(crate) fn with_handle<R>(&self, f: impl FnOnce(&mut D::Handle) -> R) -> Option<R> {
        self.hw.lock().as_mut().map(|slot| f(&mut slot.handle))
    }

    fn recover_locked(
        &self,
        slot: &mut Option<HwSlot<D::Handle>>,
        err: HwError,
    ) -> Result<RecoveryAction, HwError> {
        let result = self
            .recovery
            .recover(&self.device, slot, err, || self.open_slot());
        match &result {
            Ok(action) => debug!(?action, code = err.code, "Hardware error recovered"),
            Err(e) => warn!(code = e.code, "Hardware recovery failed"),
        }
        result
    }

    /// Stop the stream after an unrecoverable hardware error
    pub(crate) fn fail(&self, err: HwError) {
        self.fail_as(err, StreamError::FatalError);
    }

    /// Stop the stream when the readiness query stays broken after recovery
    ///
    /// Capture reports this as `IoError`, playback as `FatalError`.
    pub(crate) fn fail_readiness(&self, err: HwError) {
        let stream_error = match self.direction {
            Direction::Playback => StreamError::FatalError,
            Direction::Capture => StreamError::IoError,
        };
        self.fail_as(err, stream_error);
    }

    fn fail_as(&self, err: HwError, stream_error: StreamError) {
        error!(
            device = self.device.name(),
            code = err.code,
            error = stream_error.name(),
            "Unrecoverable PCM error, stopping stream"
        );
        self.close_hw();
        drop(self.machine.stop_or_update_error(stream_error));
    }

    /// Stop the stream because the application side failed
    pub(crate) fn fail_client(&self, err: &std::io::Error) {
        warn!(error = %err, direction = self.direction.name(), "Client I/O failed, stopping stream");
        self.close_hw();
        drop(self.machine.stop_or_update_error(StreamError::IoError));
    }

    /// Stop the stream after a push write made no progress for `retries` attempts
    pub(crate) fn fail_stalled(&self, retries: u32) {
        error!(
            device = self.device.name(),
            retries, "Push write stalled, stopping stream"
        );
        self.close_hw();
        drop(self.machine.stop_or_update_error(StreamError::FatalError));
    }

    /// Bytes the hardware can take (playback) or hand over (capture)
    ///
    /// Faults are recovered and queried again. `None` means there is no
    /// handle, or the fault was unrecoverable and the stream is now stopped.
    pub fn avail(&self) -> Option<usize> {
        let mut guard = self.hw.lock();
        let slot = guard.as_mut()?;
        let buffer_bytes = slot.buffer_bytes;

        let bytes = match slot.handle.avail() {
            Ok(bytes) => bytes,
            Err(err) => match self.recover_locked(&mut guard, err) {
                Ok(_) => match guard.as_mut().map(|slot| slot.handle.avail()) {
                    Some(Ok(bytes)) => bytes,
                    _ => 0,
                },
                Err(err) => {
                    drop(guard);
                    self.fail_readiness(err);
                    return None;
                }
            },
        };
        Some(bytes.min(buffer_bytes))
    }

    /// Write whole frames from `data`, scaled by the current volume
    ///
    /// Returns the bytes accepted (0 when the hardware is full or a fault was
    /// recovered), or `None` once the stream has stopped.
    pub(crate) fn write_frames(&self, data: &[u8]) -> Option<usize> {
        let format = self.format();
        let free = self.avail()?;
        let len = format.align_down(free.min(data.len()));
        if len == 0 {
            return Some(0);
        }

        let volume = self.volume();
        let out: Cow<'_, [u8]> = if volume < 1.0 {
            let mut scaled = data[..len].to_vec();
            apply_volume(volume, &format, &mut scaled);
            Cow::Owned(scaled)
        } else {
            Cow::Borrowed(&data[..len])
        };

        let mut guard = self.hw.lock();
        let slot = guard.as_mut()?;
        let written = match slot.handle.write(&out) {
            Ok(n) => n,
            Err(err) => match self.recover_locked(&mut guard, err) {
                Ok(_) => 0,
                Err(err) => {
                    drop(guard);
                    self.fail(err);
                    return None;
                }
            },
        };
        drop(guard);

        if written > 0 {
            self.processed_frames
                .fetch_add(format.frames_for_bytes(written) as u64, Ordering::Relaxed);
            self.resuming.store(false, Ordering::Release);
            self.mark_running(RunningState::Active);
        }
        Some(written)
    }

    /// Read whole frames into `buf`, scaled by the current volume
    ///
    /// Same return convention as [`write_frames`](Self::write_frames).
    pub(crate) fn read_frames(&self, buf: &mut [u8]) -> Option<usize> {
        let format = self.format();
        let ready = self.avail()?;
        let len = format.align_down(ready.min(buf.len()));
        if len == 0 {
            return Some(0);
        }

        let mut guard = self.hw.lock();
        let slot = guard.as_mut()?;
        let read = match slot.handle.read(&mut buf[..len]) {
            Ok(n) => n,
            Err(err) => match self.recover_locked(&mut guard, err) {
                Ok(_) => 0,
                Err(err) => {
                    drop(guard);
                    self.fail(err);
                    return None;
                }
            },
        };
        drop(guard);

        if read > 0 {
            apply_volume(self.volume(), &format, &mut buf[..read]);
            self.processed_frames
                .fetch_add(format.frames_for_bytes(read) as u64, Ordering::Relaxed);
        }
        Some(read)
    }

    /// Prepare and start the handle again after a suspend
    pub(crate) fn restart_hw(&self) -> bool {
        let mut guard = self.hw.lock();
        let Some(slot) = guard.as_mut() else {
            return false;
        };

        if let Err(err) = slot.handle.prepare() {
            if let Err(err) = self.recover_locked(&mut guard, err) {
                drop(guard);
                self.fail(err);
                return false;
            }
        }

        let Some(slot) = guard.as_mut() else {
            return false;
        };
        if let Err(err) = slot.handle.start() {
            if let Err(err) = self.recover_locked(&mut guard, err) {
                drop(guard);
                self.fail(err);
                return false;
            }
        }
        true
    }

    /// Move between Active and Idle with `NoError`, skipping no-op transitions
    pub(crate) fn mark_running(&self, running: RunningState) {
        let target = StreamState::from(running);
        if self.machine.state() != target || self.machine.error() != StreamError::NoError {
            drop(self.machine.update_active_or_idle(running, StreamError::NoError));
        }
    }

    /// Go Idle with `UnderrunError`, once per starvation episode
    pub(crate) fn report_underrun(&self) {
        if self.machine.state() == StreamState::Idle {
            return;
        }
        if let Some(notifier) = self
            .machine
            .update_active_or_idle(RunningState::Idle, StreamError::UnderrunError)
        {
            if notifier.is_state_changed() {
                warn!(device = self.device.name(), "Playback underrun");
            }
        }
    }
}
