//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the Application and DeployResource kinds
pub const API_GROUP: &str = "cd.tmax.io";

/// Finalizer placed on every Application so tracked objects are cleaned up on deletion
pub const APPLICATION_FINALIZER: &str = "cd.tmax.io/finalizer";

/// Label carried by every DeployResource record, value is `<app>-<namespace>`
pub const APPLICATION_LABEL: &str = "cd.tmax.io/application";

/// Suffix of the Secret holding a destination cluster's kubeconfig
pub const KUBECONFIG_SECRET_SUFFIX: &str = "-kubeconfig";

/// Key inside the kubeconfig Secret's data map
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Default Helm release / Plain YAML revision when none is given
pub const DEFAULT_TARGET_REVISION: &str = "main";

/// Default sync check period applied when an Application leaves it at zero (seconds)
pub const DEFAULT_SYNC_CHECK_PERIOD_SECS: u64 = 60;

/// Longest accepted sync check period (one week, seconds)
pub const MAX_SYNC_CHECK_PERIOD_SECS: u64 = 604_800;

/// Default timeout for a single cluster API call (seconds)
pub const DEFAULT_API_CALL_TIMEOUT_SECS: u64 = 30;

/// Default timeout for git provider HTTP calls and git CLI invocations (seconds)
pub const DEFAULT_GIT_CALL_TIMEOUT_SECS: u64 = 60;

/// Default directory for local repository clones used by Helm rendering
pub const DEFAULT_REPO_CACHE_DIR: &str = "/tmp/gitops-sync";

/// Default HTTP server port for webhooks, metrics and health probes
pub const DEFAULT_SERVER_PORT: u16 = 24335;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default Fibonacci backoff floor for reconcile errors (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Default Fibonacci backoff ceiling for reconcile errors (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default delay before restarting the watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Length of the generated per-Application webhook secret
pub const WEBHOOK_SECRET_LENGTH: usize = 20;

/// Public GitHub host and its REST API base
pub const GITHUB_HOST: &str = "github.com";
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// First delay when the API server throttles the watch (429)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1_000;

/// Cap for the throttled-watch delay, doubled on each 429
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;
