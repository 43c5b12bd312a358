//! Subscriber setup for hosts. Libraries only emit events.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber. `RUST_LOG` wins over `fallback`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
