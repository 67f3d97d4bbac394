//! # Observability
//!
//! Prometheus metrics and tracing subscriber setup.
//!
//! - `metrics`: Prometheus metrics collection
//! - `logging`: tracing subscriber initialisation (text or JSON)

pub mod logging;
pub mod metrics;
