//! Logging setup for the rpc-prometheus binary
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the application's call. The binary installs a fmt subscriber here.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Filter directive applied when `RUST_LOG` is unset
pub fn default_directive(level: &str) -> String {
    format!("rpc_prometheus={}", level.trim().to_ascii_lowercase())
}

/// Install the global tracing subscriber
///
/// Runs at most once per process; later calls are ignored. `RUST_LOG` takes
/// precedence over `default_level`. If another subscriber is already
/// installed it is left in place.
///
/// # Examples
///
/// ```no_run
/// rpc_prometheus::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(default_level)));

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init();

        if let Err(e) = installed {
            tracing::debug!(error = %e, "Tracing subscriber already installed");
        }
    });
}
