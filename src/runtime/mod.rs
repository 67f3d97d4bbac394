//! # Runtime
//!
//! Process-level wiring around the reconciler.
//!
//! - `initialization`: startup of tracing, metrics, client, engine and HTTP server
//! - `watch_loop`: the kube-runtime controller, restarted until shutdown
//! - `error_policy`: reconcile backoff and watch error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
