//! Diagnostic logging bootstrap for binaries. Libraries only emit `tracing` events.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Explicit directive first, then `RUST_LOG`, then [`DEFAULT_LOG_FILTER`].
/// Unparseable directives fall through to the next source.
pub fn log_filter(explicit: Option<&str>) -> EnvFilter {
    explicit
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs a stderr `fmt` subscriber. Returns `false` if one was already set.
pub fn init_logging(explicit: Option<&str>) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(explicit))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
