//! Tracing setup for the command-line binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary (and to tests that want to see output).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "shotter=info,warn";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, falling back to progress-level output for this crate.
/// Output goes to stderr so `--json` results on stdout stay parseable.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .try_init();
}
