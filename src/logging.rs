//! Process-wide logging setup.
//!
//! A thin wrapper around `tracing-subscriber`'s env-filter layer: the
//! library itself only emits `tracing` events (see `builder.rs`,
//! `backends/*.rs`), it never installs a subscriber. Only the CLI
//! binary calls [`init`].

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading its filter directives
/// from `RUST_LOG`, defaulting to `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
