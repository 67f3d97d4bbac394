//! # Sync
//!
//! Reconciles an Application's live objects toward its git source.
//!
//! - [`manifest`]: desired objects from plain YAML or a Helm chart
//! - [`target`]: the store for the Application's destination cluster
//! - [`drift`]: merge-patch comparison of one desired object with the cluster
//! - [`apply`]: create or update one object
//! - [`tracker`]: DeployResource ownership records and garbage collection
//! - [`engine`]: one full pass, plus `clear` for deleted Applications
//! - [`scheduler`]: periodic passes, one cancellable task per Application
//! - [`webhook`]: event dispatch to plugins, push-triggered forced passes

pub mod apply;
pub mod drift;
pub mod engine;
pub mod error;
pub mod locks;
pub mod manifest;
pub mod merge;
pub mod scheduler;
pub mod target;
pub mod tracker;
pub mod webhook;

pub use engine::{PeriodicSync, SyncEngine, SyncReport};
pub use error::{SourceError, SyncError, TargetError};
pub use manifest::ManifestResolver;
pub use scheduler::SyncScheduler;
pub use target::TargetResolver;
pub use tracker::DeployResourceTracker;
pub use webhook::{PushSyncPlugin, WebhookDispatcher, WebhookError, WebhookPlugin};
