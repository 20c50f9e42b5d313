//! PCM format description and sample helpers
//!
//! All sample data is interleaved and in native byte order.

use serde::{Deserialize, Serialize};

/// Sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Unsigned 8-bit, centered at 128
    U8,
    /// Signed 16-bit
    #[default]
    I16,
    /// Signed 32-bit
    I32,
    /// 32-bit float in [-1.0, 1.0]
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
        }
    }

    /// Byte pattern that encodes silence
    pub fn silence_byte(self) -> u8 {
        match self {
            Self::U8 => 0x80,
            _ => 0,
        }
    }
}

/// Stream format
///
/// Fixed for the lifetime of a run; streams reject changes once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channels per frame
    pub channel_count: u16,
    /// Sample encoding
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channel_count: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channel_count,
            sample_format,
        }
    }

    /// A format is usable when it describes at least one channel at a non-zero rate
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channel_count > 0
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes_per_sample()
    }

    /// Size of one frame (one sample per channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channel_count as usize
    }

    /// Whole frames contained in `bytes`
    pub fn frames_for_bytes(&self, bytes: usize) -> usize {
        match self.bytes_per_frame() {
            0 => 0,
            bpf => bytes / bpf,
        }
    }

    pub fn bytes_for_frames(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    /// Round `bytes` down to a whole number of frames
    pub fn align_down(&self, bytes: usize) -> usize {
        self.bytes_for_frames(self.frames_for_bytes(bytes))
    }

    /// Bytes needed for `us` microseconds of audio, frame aligned
    pub fn bytes_for_duration(&self, us: u64) -> usize {
        let frames = us * u64::from(self.sample_rate) / 1_000_000;
        self.bytes_for_frames(frames as usize)
    }

    /// Playback length of `frames` in microseconds
    pub fn duration_for_frames(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        frames * 1_000_000 / u64::from(self.sample_rate)
    }

    /// Playback length of `bytes` in microseconds
    pub fn duration_for_bytes(&self, bytes: usize) -> u64 {
        self.duration_for_frames(self.frames_for_bytes(bytes) as u64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(48000, 2, SampleFormat::I16)
    }
}

/// Scale every whole sample in `buf` by `volume`
///
/// Trailing bytes that do not form a complete sample are left untouched.
pub fn apply_volume(volume: f32, format: &AudioFormat, buf: &mut [u8]) {
    if volume >= 1.0 {
        return;
    }
    let volume = volume.max(0.0);

    match format.sample_format {
        SampleFormat::U8 => {
            for b in buf.iter_mut() {
                let centered = f32::from(*b) - 128.0;
                *b = (centered * volume + 128.0).round().clamp(0.0, 255.0) as u8;
            }
        }
        SampleFormat::I16 => {
            for chunk in buf.chunks_exact_mut(2) {
                let s = i16::from_ne_bytes([chunk[0], chunk[1]]);
                let scaled = (f32::from(s) * volume) as i16;
                chunk.copy_from_slice(&scaled.to_ne_bytes());
            }
        }
        SampleFormat::I32 => {
            for chunk in buf.chunks_exact_mut(4) {
                let s = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let scaled = (f64::from(s) * f64::from(volume)) as i32;
                chunk.copy_from_slice(&scaled.to_ne_bytes());
            }
        }
        SampleFormat::F32 => {
            for chunk in buf.chunks_exact_mut(4) {
                let s = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                chunk.copy_from_slice(&(s * volume).to_ne_bytes());
            }
        }
    }
}
