/// PCM formats, buffers and backends
pub mod audio;

/// Per-tick transfer engine and fault recovery
pub mod pump;

/// Stream state machine and configuration
pub mod state;

/// Playback and capture streams
pub mod stream;

/// Utility modules
pub mod utils;

pub use audio::{AudioError, AudioFormat, AudioResult, MockDevice, PcmDevice, SampleFormat};
pub use state::{StreamConfig, StreamError, StreamEvent, StreamState, TickMode};
pub use stream::{AudioSink, AudioSource, PushReader, PushWriter};
