//! Tracing setup for the supervisor.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` controls filtering; the default keeps the crate at `info`
/// with the rest of the dependency graph at `warn`. Safe to call more than
/// once (later calls are no-ops), so embedding binaries and tests can both
/// call it unconditionally.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,apiary=info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
