use thiserror::Error;

use super::format::AudioFormat;

/// Raw backend error code
///
/// Negative errno-style value as reported by the PCM backend. The well-known
/// codes are exposed as constants so backends and tests speak the same language.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("hardware error {code}")]
pub struct HwError {
    /// Negative error code
    pub code: i32,
}

impl HwError {
    /// I/O error (device hiccup, usually recoverable by resume/prepare)
    pub const EIO: i32 = -5;
    /// Resource temporarily unavailable
    pub const EAGAIN: i32 = -11;
    /// No such device
    pub const ENODEV: i32 = -19;
    /// Invalid argument
    pub const EINVAL: i32 = -22;
    /// Broken pipe (buffer overrun/underrun)
    pub const EPIPE: i32 = -32;
    /// Streams pipe error (system suspend)
    pub const ESTRPIPE: i32 = -86;

    /// Create an error from a raw code
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    /// Buffer xrun
    pub fn pipe() -> Self {
        Self::new(Self::EPIPE)
    }

    /// Device was suspended by the system
    pub fn suspended() -> Self {
        Self::new(Self::ESTRPIPE)
    }

    /// Generic I/O failure
    pub fn io() -> Self {
        Self::new(Self::EIO)
    }

    /// Operation would block
    pub fn would_block() -> Self {
        Self::new(Self::EAGAIN)
    }

    /// Device disappeared or could not be opened
    pub fn no_device() -> Self {
        Self::new(Self::ENODEV)
    }
}

/// Audio-related errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// Format cannot be used to open a stream
    #[error("Invalid audio format: {0:?}")]
    InvalidFormat(AudioFormat),

    /// Backend refused to open the device
    #[error("Failed to open audio device '{device}': {source}")]
    OpenFailed {
        device: String,
        #[source]
        source: HwError,
    },

    /// Operation requires the stream to be stopped
    #[error("Stream is not stopped")]
    NotStopped,

    /// Stream configuration is inconsistent
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),

    /// Failed to spawn the pump thread
    #[error("Failed to spawn pump thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// Unrecoverable hardware error
    #[error("Hardware error: {0}")]
    Hardware(#[from] HwError),

    /// Device enumeration failed
    #[cfg(feature = "cpal-backend")]
    #[error("CPAL error: {0}")]
    Devices(#[from] cpal::DevicesError),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
