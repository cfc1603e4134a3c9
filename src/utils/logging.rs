//! Tracing setup for the broker binary and tests.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Parses a configured level. Unknown names fall back to `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "warning" => LevelFilter::WARN,
        other => other.parse().unwrap_or(LevelFilter::INFO),
    }
}

/// Installs the global subscriber. `RUST_LOG` directives are applied on top
/// of the configured level. Later calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(level).into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
