//! Diagnostic tracing for cogcycle.
//!
//! Tracing output goes to stderr and is filtered by `RUST_LOG`. Product
//! artifacts (bundles, reflections, session records) are written regardless
//! of the filter.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn";

/// Initialize the global tracing subscriber.
///
/// Reads `RUST_LOG`, falling back to `warn`. Output is compact and goes to
/// stderr so stdout stays clean for JSON output.
///
/// ```bash
/// RUST_LOG=cogcycle=debug cogcycle run "add logging"
/// ```
pub fn init() {
    init_with_default(DEFAULT_FILTER);
}

/// Like [`init`] with a caller-chosen fallback filter.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
