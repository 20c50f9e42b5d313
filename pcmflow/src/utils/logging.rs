use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter};

const DEFAULT_FILTER: &str = "pcmflow=debug,warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging with tracing
///
/// This function sets up the tracing subscriber with the following configuration:
/// - Reads filter from RUST_LOG environment variable if available
/// - Falls back to "pcmflow=debug,warn" if RUST_LOG is not set
/// - Uses a formatted output layer
///
/// Does nothing if a global subscriber is already installed.
///
/// # Example
///
/// ```no_run
/// use pcmflow::utils::logging::init_logging;
///
/// init_logging();
/// ```
pub fn init_logging() {
    if try_init_logging().is_ok() {
        tracing::info!("PcmFlow logging initialized");
    }
}

/// Like [`init_logging`], but reports an already installed subscriber
///
/// # Errors
/// Returns error if a global subscriber was set before
pub fn try_init_logging() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter())
        .try_init()
}
