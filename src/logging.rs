//! Logger setup built on `tracing`.

use tracing_subscriber::{EnvFilter, fmt};

/// Installs a global fmt subscriber filtered by `RUST_LOG`, defaulting to
/// `info`.
///
/// Returns `false` when a global subscriber was already set.
pub fn init_logger() -> bool {
  fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_thread_names(true)
    .try_init()
    .is_ok()
}

