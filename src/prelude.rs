//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use gitops_sync_controller::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::cluster::{ClusterConnector, ClusterError, ClusterStore, ObjectRef, SharedClusterStore};

pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};

pub use crate::config::{ControllerConfig, SharedControllerConfig};

pub use crate::sync::{SyncEngine, SyncError, SyncReport, SyncScheduler, WebhookDispatcher};
