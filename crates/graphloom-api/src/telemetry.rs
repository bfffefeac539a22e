//! One-shot tracing initialization for hosting processes.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` controls the filter; the
/// default is `info`. Safe to call more than once.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}
