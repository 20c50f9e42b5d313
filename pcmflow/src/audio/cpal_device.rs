//! CPAL backend
//!
//! CPAL drives audio from its own callback thread, while [`PcmHandle`] is a
//! blocking read/write interface. Each handle bridges the two with a
//! `ringbuf` buffer sized to the negotiated hardware buffer: playback writes
//! fill it and the callback drains it, capture goes the other way.
//!
//! `cpal::Stream` is not `Send` on every platform, so a worker thread owns it
//! and takes play/pause/close commands over a channel.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Sender};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tracing::{debug, error, info, warn};

use crate::audio::device::{Direction, HwParams, PcmDevice, PcmHandle};
use crate::audio::error::{AudioResult, HwError};
use crate::audio::format::{AudioFormat, SampleFormat};
use crate::state::config::StreamConfig;

/// List device names for `direction` on the default host
///
/// # Errors
/// Returns error if the host cannot enumerate devices
pub fn list_devices(direction: Direction) -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices: Vec<cpal::Device> = match direction {
        Direction::Playback => host.output_devices()?.collect(),
        Direction::Capture => host.input_devices()?.collect(),
    };

    Ok(devices.iter().filter_map(|d| d.name().ok()).collect())
}

fn cpal_sample_format(format: SampleFormat) -> cpal::SampleFormat {
    match format {
        SampleFormat::U8 => cpal::SampleFormat::U8,
        SampleFormat::I16 => cpal::SampleFormat::I16,
        SampleFormat::I32 => cpal::SampleFormat::I32,
        SampleFormat::F32 => cpal::SampleFormat::F32,
    }
}

fn frames_for_time(sample_rate: u32, us: u64) -> usize {
    (sample_rate as u64 * us / 1_000_000) as usize
}

fn build_error_code(err: &cpal::BuildStreamError) -> i32 {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => HwError::ENODEV,
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => HwError::EINVAL,
        _ => HwError::EIO,
    }
}

/// PCM device backed by the platform's default CPAL host
#[derive(Debug, Clone)]
pub struct CpalDevice {
    /// Device name, `None` for the host default
    device_name: Option<String>,
    label: String,
}

impl CpalDevice {
    /// Use the named device, or the host default when `name` is `None`
    pub fn new(name: Option<&str>) -> Self {
        Self {
            device_name: name.map(str::to_string),
            label: name.unwrap_or("default").to_string(),
        }
    }

    fn find(&self, direction: Direction) -> Result<cpal::Device, HwError> {
        let host = cpal::default_host();

        let Some(wanted) = self.device_name.as_deref() else {
            let device = match direction {
                Direction::Playback => host.default_output_device(),
                Direction::Capture => host.default_input_device(),
            };
            return device.ok_or_else(HwError::no_device);
        };

        let devices = match direction {
            Direction::Playback => host.output_devices(),
            Direction::Capture => host.input_devices(),
        }
        .map_err(|e| {
            warn!("Failed to enumerate devices: {}", e);
            HwError::no_device()
        })?;

        for device in devices {
            if device.name().is_ok_and(|name| name == wanted) {
                return Ok(device);
            }
        }
        Err(HwError::no_device())
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PcmDevice for CpalDevice {
    type Handle = CpalHandle;

    fn name(&self) -> &str {
        &self.label
    }

    fn open(
        &self,
        direction: Direction,
        format: &AudioFormat,
        config: &StreamConfig,
    ) -> Result<CpalHandle, HwError> {
        let device = self.find(direction)?;

        let params = HwParams {
            buffer_frames: frames_for_time(format.sample_rate, config.buffer_time_us).max(1),
            period_frames: frames_for_time(format.sample_rate, config.period_time_us).max(1),
        };
        let stream_config = cpal::StreamConfig {
            channels: format.channel_count,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = HeapRb::<u8>::new(format.bytes_for_frames(params.buffer_frames));
        let (producer, consumer) = ring.split();
        let fault = Arc::new(AtomicI32::new(0));
        let flush = Arc::new(AtomicBool::new(false));

        let (cmd_tx, cmd_rx) = unbounded::<Command>();
        let (ready_tx, ready_rx) = bounded::<Result<(), HwError>>(1);

        let sample_format = cpal_sample_format(format.sample_format);
        let silence = format.sample_format.silence_byte();
        let error_fault = Arc::clone(&fault);
        let callback_fault = Arc::clone(&fault);
        let callback_flush = Arc::clone(&flush);

        // Each side keeps the ring half it needs; the other goes to the callback
        let (app_side, callback_side) = match direction {
            Direction::Playback => (RingSide::Producer(producer), RingSide::Consumer(consumer)),
            Direction::Capture => (RingSide::Consumer(consumer), RingSide::Producer(producer)),
        };

        let worker = std::thread::Builder::new()
            .name(format!("pcmflow-cpal-{}", direction.name()))
            .spawn(move || {
                let on_error = move |err: cpal::StreamError| {
                    error!("Audio stream error: {}", err);
                    let code = match err {
                        cpal::StreamError::DeviceNotAvailable => HwError::ENODEV,
                        _ => HwError::EIO,
                    };
                    error_fault.store(code, Ordering::Release);
                };

                let built = match callback_side {
                    RingSide::Consumer(mut consumer) => device.build_output_stream_raw(
                        &stream_config,
                        sample_format,
                        move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                            if callback_flush.swap(false, Ordering::AcqRel) {
                                let pending = consumer.occupied_len();
                                consumer.skip(pending);
                            }
                            let out = data.bytes_mut();
                            let n = consumer.pop_slice(out);
                            out[n..].fill(silence);
                        },
                        on_error,
                        None,
                    ),
                    RingSide::Producer(mut producer) => device.build_input_stream_raw(
                        &stream_config,
                        sample_format,
                        move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                            let bytes = data.bytes();
                            if producer.push_slice(bytes) < bytes.len() {
                                // overrun: the handle reports it as an xrun
                                let _ = callback_fault.compare_exchange(
                                    0,
                                    HwError::EPIPE,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                );
                            }
                        },
                        on_error,
                        None,
                    ),
                };

                let stream = match built {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        error!("Failed to build audio stream: {}", e);
                        let _ = ready_tx.send(Err(HwError::new(build_error_code(&e))));
                        return;
                    }
                };

                while let Ok(command) = cmd_rx.recv() {
                    let result = match command {
                        Command::Play => stream.play().map_err(|e| e.to_string()),
                        Command::Pause => stream.pause().map_err(|e| e.to_string()),
                        Command::Close => break,
                    };
                    if let Err(e) = result {
                        warn!(?command, "Stream control failed: {}", e);
                    }
                }
                debug!("CPAL stream closed");
            })
            .map_err(|e| {
                error!("Failed to spawn CPAL worker: {}", e);
                HwError::io()
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(HwError::io());
            }
        }

        info!(
            "CPAL {} stream opened on '{}': {} Hz, {} channels",
            direction.name(),
            self.label,
            format.sample_rate,
            format.channel_count
        );

        Ok(CpalHandle {
            params,
            bytes_per_frame: format.bytes_per_frame(),
            frame_time: Duration::from_micros(format.duration_for_frames(1).max(1)),
            ring: app_side,
            fault,
            flush,
            commands: cmd_tx,
            worker: Some(worker),
            playing: false,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Play,
    Pause,
    Close,
}

enum RingSide {
    Producer(HeapProd<u8>),
    Consumer(HeapCons<u8>),
}

/// Open CPAL stream
pub struct CpalHandle {
    params: HwParams,
    bytes_per_frame: usize,
    frame_time: Duration,
    ring: RingSide,
    /// Pending error code raised by the callback thread, 0 when none
    fault: Arc<AtomicI32>,
    /// Asks the playback callback to discard queued bytes
    flush: Arc<AtomicBool>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    playing: bool,
}

impl CpalHandle {
    fn take_fault(&self) -> Result<(), HwError> {
        match self.fault.swap(0, Ordering::AcqRel) {
            0 => Ok(()),
            code => Err(HwError::new(code)),
        }
    }

    fn align(&self, bytes: usize) -> usize {
        bytes - bytes % self.bytes_per_frame.max(1)
    }

    fn send(&mut self, command: Command) -> Result<(), HwError> {
        self.commands.send(command).map_err(|_| HwError::io())?;
        self.playing = matches!(command, Command::Play);
        Ok(())
    }

    fn discard(&mut self) {
        match &mut self.ring {
            RingSide::Producer(_) => self.flush.store(true, Ordering::Release),
            RingSide::Consumer(consumer) => {
                let pending = consumer.occupied_len();
                consumer.skip(pending);
            }
        }
    }
}

impl PcmHandle for CpalHandle {
    fn params(&self) -> HwParams {
        self.params
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, HwError> {
        self.take_fault()?;
        let RingSide::Producer(producer) = &mut self.ring else {
            return Err(HwError::new(HwError::EINVAL));
        };

        let len = data.len().min(producer.vacant_len());
        let len = len - len % self.bytes_per_frame.max(1);
        let written = producer.push_slice(&data[..len]);

        if written > 0 && !self.playing {
            self.send(Command::Play)?;
        }
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HwError> {
        self.take_fault()?;
        let len = self.align(buf.len());
        let RingSide::Consumer(consumer) = &mut self.ring else {
            return Err(HwError::new(HwError::EINVAL));
        };

        let ready = len.min(consumer.occupied_len());
        let ready = ready - ready % self.bytes_per_frame.max(1);
        Ok(consumer.pop_slice(&mut buf[..ready]))
    }

    fn avail(&mut self) -> Result<usize, HwError> {
        self.take_fault()?;
        let bytes = match &self.ring {
            RingSide::Producer(producer) => producer.vacant_len(),
            RingSide::Consumer(consumer) => consumer.occupied_len(),
        };
        Ok(self.align(bytes))
    }

    fn prepare(&mut self) -> Result<(), HwError> {
        self.fault.store(0, Ordering::Release);
        self.discard();
        Ok(())
    }

    fn start(&mut self) -> Result<(), HwError> {
        self.send(Command::Play)
    }

    fn resume(&mut self) -> Result<(), HwError> {
        self.send(Command::Play)
    }

    fn drop_pending(&mut self) -> Result<(), HwError> {
        self.discard();
        self.send(Command::Pause)
    }

    fn drain(&mut self) -> Result<(), HwError> {
        let RingSide::Producer(producer) = &self.ring else {
            return Ok(());
        };

        let pending = producer.occupied_len() / self.bytes_per_frame.max(1);
        let deadline = Instant::now()
            + self.frame_time * (pending as u32).saturating_mul(2)
            + Duration::from_millis(50);
        while producer.occupied_len() > 0 {
            if Instant::now() >= deadline {
                warn!("Drain did not finish before its deadline");
                break;
            }
            self.take_fault()?;
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("CPAL worker panicked");
            }
        }
    }
}
