//! GitOps Sync Controller Library
//!
//! Reconciles `Application` resources: manifests read from git (plain YAML
//! or a Helm chart) are applied to the Application's destination cluster,
//! drift is detected and corrected, and objects no longer in git are
//! garbage-collected through `DeployResource` ownership records.
//!
//! ## Quick Start
//!
//! ```rust
//! use gitops_sync_controller::prelude::*;
//! ```

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod git;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
pub mod sync;
