//! # Logging
//!
//! Installs the global tracing subscriber.
//!
//! The filter comes from `RUST_LOG` when set, otherwise
//! `gitops_sync_controller=info`. `LOG_FORMAT=json` switches to
//! newline-delimited JSON for log shippers.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "gitops_sync_controller=info";

/// Initialise tracing once for the process.
///
/// Returns an error when a global subscriber is already installed.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
