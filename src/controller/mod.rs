//! # Controller
//!
//! Application controller modules.
//!
//! - `backoff`: Fibonacci backoff for failed reconciles
//! - `reconciler`: Application reconcile handler and finalizer

pub mod backoff;
pub mod reconciler;
