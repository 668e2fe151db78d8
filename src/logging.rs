//! Structured logging setup (SPEC_FULL.md §10.1), ported from the
//! teacher's `fc-common::logging` helper. Library code never calls this —
//! it only emits `tracing` events into whatever subscriber the embedding
//! application installs. `init_logging` is for binaries and integration
//! tests that want a ready-made subscriber.

use tracing_subscriber::fmt;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a global `tracing` subscriber filtered by `RUST_LOG`
/// (defaulting to `info` for this crate, `warn` elsewhere). Set
/// `LOG_FORMAT=json` to switch to structured JSON output.
pub fn init_logging(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("warn,{}=info", service_name)));

    let registry = Registry::default().with(filter);

    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        registry.with(fmt::layer().json().with_current_span(true).with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true).with_thread_ids(false)).init();
    }
}

/// One-shot subscriber installer for integration tests that want readable
/// output on failure. Safe to call from multiple test threads: subsequent
/// calls after the first are no-ops.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init();
    });
}
