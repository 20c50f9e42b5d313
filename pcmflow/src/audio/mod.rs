/// Capture ring buffer
pub mod buffer;

/// PCM backend abstraction
pub mod device;

/// Audio-related error types
pub mod error;

/// Sample formats and byte/frame/time arithmetic
pub mod format;

/// Scriptable in-memory backend
pub mod mock;

/// CPAL backend
#[cfg(feature = "cpal-backend")]
pub mod cpal_device;

// Re-export commonly used types
pub use buffer::RingBuffer;
pub use device::{Direction, ErrorClass, HwParams, PcmDevice, PcmHandle};
pub use error::{AudioError, AudioResult, HwError};
pub use format::{AudioFormat, SampleFormat};
pub use mock::{MockCounters, MockDevice, MockHandle, MockOp};

#[cfg(feature = "cpal-backend")]
pub use cpal_device::{list_devices, CpalDevice, CpalHandle};
