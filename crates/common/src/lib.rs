//! Shared building blocks for the Bitstamp workspace.
//!
//! - **Backoff**: reconnect delay policies (fixed or exponential with jitter)
//! - **Endpoints**: REST and websocket URLs, overridable from the environment
//! - **Number parsing**: exchange numbers that arrive either quoted or bare
//! - **Logging**: `tracing` subscriber bootstrap for binaries

mod backoff;
mod endpoints;
mod number;

pub use backoff::{ExponentialBackoff, ReconnectBackoff};
pub use endpoints::Endpoints;
pub use number::{parse_flexible_f64, parse_flexible_u64, NumberError};

use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Install the global `tracing` subscriber.
///
/// Reads the filter from `RUST_LOG`, falling back to `info`. Only binaries
/// should call this; library code receives its context explicitly.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
