//! Structured logging setup: a `tracing_subscriber` `fmt` subscriber with an
//! `EnvFilter` read from `RUST_LOG`, defaulting to `info` when unset.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the global `tracing` subscriber. Safe to call more than once in
/// the same process: a second call is a no-op rather than a panic, since
/// tests in this crate and its dependents may each try to initialize it.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
