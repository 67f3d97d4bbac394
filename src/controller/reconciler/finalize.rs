//! # Finalizer
//!
//! Every Application carries [`APPLICATION_FINALIZER`] so the objects it
//! deployed are removed before the Application itself disappears.
//!
//! Deletion order: clear tracked objects, cancel the periodic task, then drop
//! the finalizer and let the API server finish the delete.

use super::types::{Reconciler, ReconcilerError};
use crate::cluster::{from_dynamic, to_dynamic, ClusterError, ClusterStore};
use crate::constants::APPLICATION_FINALIZER;
use crate::crd::Application;
use crate::sync::SyncError;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{info, warn};

#[must_use]
pub fn has_finalizer(app: &Application) -> bool {
    app.finalizers().iter().any(|f| f == APPLICATION_FINALIZER)
}

/// Write `finalizers` back with the Application's resourceVersion.
///
/// A concurrent writer makes this fail with a conflict; the reconcile is retried.
async fn write_finalizers(
    app: &Application,
    finalizers: Vec<String>,
    store: &dyn ClusterStore,
) -> Result<Application, ReconcilerError> {
    let mut updated = app.clone();
    updated.metadata.finalizers = Some(finalizers);
    replace(&updated, store)
        .await
        .map_err(|source| ReconcilerError::Finalizer {
            app: app.app_key().to_string(),
            source,
        })
}

async fn replace(app: &Application, store: &dyn ClusterStore) -> Result<Application, ClusterError> {
    let stored = store.update(&to_dynamic(app)?, false).await?;
    from_dynamic(&stored)
}

/// Add the finalizer, returning the stored Application
pub async fn add_finalizer(
    app: &Application,
    store: &dyn ClusterStore,
) -> Result<Application, ReconcilerError> {
    let mut finalizers = app.finalizers().to_vec();
    finalizers.push(APPLICATION_FINALIZER.to_string());
    let stored = write_finalizers(app, finalizers, store).await?;
    info!(app = %app.app_key(), "controller.finalizer.added");
    Ok(stored)
}

pub async fn remove_finalizer(
    app: &Application,
    store: &dyn ClusterStore,
) -> Result<Application, ReconcilerError> {
    let finalizers = app
        .finalizers()
        .iter()
        .filter(|f| *f != APPLICATION_FINALIZER)
        .cloned()
        .collect();
    let stored = write_finalizers(app, finalizers, store).await?;
    info!(app = %app.app_key(), "controller.finalizer.removed");
    Ok(stored)
}

/// Tear down an Application marked for deletion
pub async fn cleanup(app: &Application, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let key = app.app_key();
    if !has_finalizer(app) {
        ctx.scheduler.cancel(&key).await;
        return Ok(Action::await_change());
    }

    match ctx.engine.clear(app).await {
        Ok(removed) => info!(app = %key, removed = removed.len(), "controller.cleanup.cleared"),
        // An unreachable destination would otherwise block the delete forever
        Err(e @ SyncError::TargetResolution { .. }) => {
            warn!(app = %key, error = %e, "controller.cleanup.target_unavailable");
        }
        Err(e) => return Err(e.into()),
    }
    ctx.scheduler.cancel(&key).await;
    remove_finalizer(app, ctx.store.as_ref()).await?;
    Ok(Action::await_change())
}
