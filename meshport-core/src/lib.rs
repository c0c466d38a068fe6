//! Ambient support shared by the `meshport` pipeline and its CLI harness:
//! process start time, and a standard `tracing` subscriber installer.

pub mod prelude;

use once_cell::sync::Lazy;
use std::time::Instant;

/// When the process started, for uptime-style logging. Lazily captured on
/// first access rather than at a fixed startup hook.
pub static APPLICATION_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Installs a standard `tracing_subscriber::fmt` subscriber reading its
/// filter from `RUST_LOG` (defaulting to `info`). Intended to be called once,
/// near the top of a binary's `main`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
