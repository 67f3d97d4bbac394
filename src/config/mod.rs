//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.
//!
//! Every setting has a default in [`crate::constants`] and can be overridden
//! through the environment, which in a deployment is populated from a
//! ConfigMap using `envFrom`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Shared, immutable configuration handle
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Controller-level configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Period used when an Application's `syncCheckPeriod` is zero (seconds)
    pub default_sync_check_period_secs: u64,
    /// Timeout applied to every cluster API call (seconds)
    pub api_call_timeout_secs: u64,
    /// Timeout applied to git provider HTTP calls and git CLI runs (seconds)
    pub git_call_timeout_secs: u64,
    /// Directory holding local clones used for Helm rendering
    pub repo_cache_dir: PathBuf,
    /// Helm binary used to render charts
    pub helm_binary: String,
    /// Git binary used to clone and refresh repositories
    pub git_binary: String,
    /// HTTP server port (webhooks, metrics, probes)
    pub server_port: u16,
    /// Log format (json, text)
    pub log_format: String,
    /// Fibonacci backoff floor for reconcile errors (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff ceiling for reconcile errors (seconds)
    pub backoff_max_secs: u64,
    /// Delay before restarting the watch stream after it ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Serialize passes for the same Application (timer and webhook)
    pub serialize_sync_passes: bool,
    /// Extra git hosts and their REST API bases, e.g. `git.example.com=https://git.example.com/api/v3`
    pub git_provider_hosts: HashMap<String, String>,
    /// Host (and port) git hosts use to reach the webhook endpoint
    pub external_hostname: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::{
            DEFAULT_API_CALL_TIMEOUT_SECS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS,
            DEFAULT_GIT_CALL_TIMEOUT_SECS, DEFAULT_REPO_CACHE_DIR, DEFAULT_SERVER_PORT,
            DEFAULT_SYNC_CHECK_PERIOD_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
        };
        Self {
            default_sync_check_period_secs: DEFAULT_SYNC_CHECK_PERIOD_SECS,
            api_call_timeout_secs: DEFAULT_API_CALL_TIMEOUT_SECS,
            git_call_timeout_secs: DEFAULT_GIT_CALL_TIMEOUT_SECS,
            repo_cache_dir: PathBuf::from(DEFAULT_REPO_CACHE_DIR),
            helm_binary: "helm".to_string(),
            git_binary: "git".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            log_format: "text".to_string(),
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            serialize_sync_passes: true,
            git_provider_hosts: HashMap::new(),
            external_hostname: String::new(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::{
            DEFAULT_API_CALL_TIMEOUT_SECS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS,
            DEFAULT_GIT_CALL_TIMEOUT_SECS, DEFAULT_REPO_CACHE_DIR, DEFAULT_SERVER_PORT,
            DEFAULT_SYNC_CHECK_PERIOD_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
        };
        Self {
            default_sync_check_period_secs: env_var_or_default(
                "DEFAULT_SYNC_CHECK_PERIOD_SECS",
                DEFAULT_SYNC_CHECK_PERIOD_SECS,
            ),
            api_call_timeout_secs: env_var_or_default(
                "API_CALL_TIMEOUT_SECS",
                DEFAULT_API_CALL_TIMEOUT_SECS,
            ),
            git_call_timeout_secs: env_var_or_default(
                "GIT_CALL_TIMEOUT_SECS",
                DEFAULT_GIT_CALL_TIMEOUT_SECS,
            ),
            repo_cache_dir: PathBuf::from(env_var_or_default_str(
                "REPO_CACHE_DIR",
                DEFAULT_REPO_CACHE_DIR,
            )),
            helm_binary: env_var_or_default_str("HELM_BINARY", "helm"),
            git_binary: env_var_or_default_str("GIT_BINARY", "git"),
            server_port: env_var_or_default("SERVER_PORT", DEFAULT_SERVER_PORT),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            serialize_sync_passes: env_var_or_default_bool("SERIALIZE_SYNC_PASSES", true),
            git_provider_hosts: parse_provider_hosts(&env_var_or_default_str(
                "GIT_PROVIDER_HOSTS",
                "",
            )),
            external_hostname: env_var_or_default_str("EXTERNAL_HOSTNAME", ""),
        }
    }

    /// Period used for Applications that do not set one
    #[must_use]
    pub fn default_sync_check_period(&self) -> Duration {
        Duration::from_secs(self.default_sync_check_period_secs)
    }

    /// Get API call timeout duration
    #[must_use]
    pub fn api_call_timeout(&self) -> Duration {
        Duration::from_secs(self.api_call_timeout_secs)
    }

    /// Get git call timeout duration
    #[must_use]
    pub fn git_call_timeout(&self) -> Duration {
        Duration::from_secs(self.git_call_timeout_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Host advertised in webhook URLs, `localhost:<port>` when none is configured
    #[must_use]
    pub fn webhook_host(&self) -> String {
        let host = self.external_hostname.trim().trim_end_matches('/');
        if host.is_empty() {
            format!("localhost:{}", self.server_port)
        } else {
            host.to_string()
        }
    }

    /// Whether logs should be emitted as JSON
    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Parse `host=apiBase` pairs separated by commas.
///
/// Malformed entries are skipped.
fn parse_provider_hosts(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (host, api_base) = entry.split_once('=')?;
            let host = host.trim();
            let api_base = api_base.trim().trim_end_matches('/');
            if host.is_empty() || api_base.is_empty() {
                return None;
            }
            Some((host.to_lowercase(), api_base.to_string()))
        })
        .collect()
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
