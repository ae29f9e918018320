//! Logging bootstrap for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, reading `RUST_LOG` for filter
/// directives and defaulting to `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
