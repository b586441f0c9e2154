//! Tracing setup for binaries and integration harnesses.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "scanverdict_core=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Logs go to stderr so stdout stays machine-readable.
/// A second call is a no-op.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
