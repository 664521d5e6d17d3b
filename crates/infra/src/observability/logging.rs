//! Tracing subscriber initialization
//!
//! `RUST_LOG` wins over the configured level when it is set and valid. The
//! first call installs the subscriber; later calls are no-ops, and an
//! already-installed global subscriber (from a host application or a test
//! harness) is left in place.

use std::sync::OnceLock;

use keel_core::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Install the global subscriber described by `config`
///
/// Returns true when this call (or an earlier one) installed Keel's
/// subscriber, false when another global subscriber was already present.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    *TRACING_INITIALIZED.get_or_init(|| {
        let filter = build_filter(&config.level);
        let registry = tracing_subscriber::registry().with(filter);

        let installed = if config.json {
            registry
                .with(fmt::layer().json().with_target(true).with_current_span(true))
                .try_init()
                .is_ok()
        } else {
            registry.with(fmt::layer().with_target(true).with_thread_ids(true)).try_init().is_ok()
        };

        if installed {
            tracing::info!(level = %config.level, json = config.json, "Tracing initialized");
        }
        installed
    })
}

/// `RUST_LOG` if set and valid, else `level`, else `info`
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
