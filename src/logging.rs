use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Returns false when a global subscriber was already set.
pub fn init_tracing() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
