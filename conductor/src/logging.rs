//! Process-wide tracing setup.
//!
//! Lifecycle events (mode selection, stage failures, cleanup, shutdown) are
//! emitted as structured `tracing` events on stderr so stdout stays free for
//! command output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "conductor=info,warn";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `conductor=info,warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=conductor=debug conductor list
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
