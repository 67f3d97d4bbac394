//! # Reconciler
//!
//! Reconciliation of `Application` resources.
//!
//! The reconciler keeps the per-Application bookkeeping the sync engine needs:
//! - Adds the cleanup finalizer and runs the cleanup on deletion
//! - Defaults the sync check period and sync status
//! - Generates the webhook secret and maintains status conditions
//! - Registers the Application with the [`crate::sync::SyncScheduler`]
//!
//! The sync passes themselves run in [`crate::sync::SyncEngine`].

pub mod finalize;
pub mod reconcile;
pub mod types;

pub use reconcile::reconcile;
pub use types::{BackoffState, Reconciler, ReconcilerError};
