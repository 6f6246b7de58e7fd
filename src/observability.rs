//! Tracing bootstrap for hosts.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! host's call. This helper wires the common fmt + env-filter stack.

use tracing_subscriber::EnvFilter;

/// Initializes a fmt subscriber honoring `RUST_LOG`, falling back to
/// `default_filter` (e.g. "corrcrack=info"). Errors if a global subscriber
/// is already set.
pub fn init_tracing(default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()?;

    Ok(())
}
