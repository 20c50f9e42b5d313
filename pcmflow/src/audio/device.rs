use serde::{Deserialize, Serialize};

use crate::audio::error::HwError;
use crate::audio::format::AudioFormat;
use crate::state::config::StreamConfig;

/// Transfer direction of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Application -> hardware
    Playback,
    /// Hardware -> application
    Capture,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Playback => "playback",
            Self::Capture => "capture",
        }
    }
}

/// Buffer geometry negotiated with the hardware at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwParams {
    /// Total hardware buffer length in frames
    pub buffer_frames: usize,
    /// Period (interrupt granularity) in frames
    pub period_frames: usize,
}

/// Recovery class of a backend error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Buffer xrun, cleared by re-preparing the device
    Pipe,
    /// Device was suspended by the system and must be resumed
    SystemSuspend,
    /// Transient I/O fault, handled like a suspend
    Io,
    /// Nothing is wrong, the operation just could not proceed yet
    WouldBlock,
    /// Anything else; not recoverable
    Unknown,
}

/// Default errno-style classification
pub fn classify(err: HwError) -> ErrorClass {
    match err.code {
        HwError::EPIPE => ErrorClass::Pipe,
        HwError::ESTRPIPE => ErrorClass::SystemSuspend,
        HwError::EIO => ErrorClass::Io,
        HwError::EAGAIN => ErrorClass::WouldBlock,
        _ => ErrorClass::Unknown,
    }
}

/// A PCM backend able to open hardware handles
///
/// One implementation per platform audio API. The stream core is generic over
/// this trait, so dispatch is resolved at compile time.
pub trait PcmDevice: Send + Sync + 'static {
    /// Open hardware handle; closing happens when it is dropped
    type Handle: PcmHandle;

    /// Human readable device name, used in logs and errors
    fn name(&self) -> &str;

    /// Open and configure the device for `format`
    ///
    /// Requested buffer and period lengths come from `config`; the handle
    /// reports what was actually negotiated through [`PcmHandle::params`].
    fn open(
        &self,
        direction: Direction,
        format: &AudioFormat,
        config: &StreamConfig,
    ) -> Result<Self::Handle, HwError>;

    /// Map a backend error to its recovery class
    fn error_class(&self, err: HwError) -> ErrorClass {
        classify(err)
    }
}

/// An open hardware stream
///
/// All byte counts are whole frames of the format the handle was opened with.
pub trait PcmHandle: Send + 'static {
    /// Negotiated buffer geometry
    fn params(&self) -> HwParams;

    /// Queue bytes for playback, returns how many were accepted
    fn write(&mut self, data: &[u8]) -> Result<usize, HwError>;

    /// Fetch captured bytes, returns how many were read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HwError>;

    /// Bytes the hardware can accept (playback) or deliver (capture) right now
    fn avail(&mut self) -> Result<usize, HwError>;

    /// Bring the device into the prepared state
    fn prepare(&mut self) -> Result<(), HwError>;

    /// Start the transfer explicitly
    fn start(&mut self) -> Result<(), HwError>;

    /// Resume after a system suspend
    fn resume(&mut self) -> Result<(), HwError>;

    /// Discard pending frames immediately
    fn drop_pending(&mut self) -> Result<(), HwError>;

    /// Block until pending playback frames are played
    fn drain(&mut self) -> Result<(), HwError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        assert_eq!(classify(HwError::pipe()), ErrorClass::Pipe);
        assert_eq!(classify(HwError::suspended()), ErrorClass::SystemSuspend);
        assert_eq!(classify(HwError::io()), ErrorClass::Io);
        assert_eq!(classify(HwError::would_block()), ErrorClass::WouldBlock);
        assert_eq!(classify(HwError::new(HwError::EINVAL)), ErrorClass::Unknown);
    }

    #[test]
    fn test_direction_name() {
        assert_eq!(Direction::Playback.name(), "playback");
        assert_eq!(Direction::Capture.name(), "capture");
    }
}
