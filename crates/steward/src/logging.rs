//! Logging setup for binaries and test harnesses.
//!
//! Library code logs through the `log` facade; this installs a tracing
//! subscriber and bridges `log` records into it.

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Initializes logging from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = LogTracer::init();
    }
}
