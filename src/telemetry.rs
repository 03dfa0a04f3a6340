//! Tracing subscriber setup
//!
//! Opt-in initialization for binaries and tests embedding the fabric.
//! Libraries only emit through the `tracing` macros; nothing here runs
//! unless a host calls it.

use tracing_subscriber::EnvFilter;

/// Installs a human-readable subscriber filtered by `RUST_LOG`
/// (default `info`). Safe to call more than once; later calls are
/// no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Installs a JSON-lines subscriber for log collectors.
pub fn init_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init();
}
