//! Writes one object to the target cluster.
//!
//! Failures are returned as-is: a create of an invalid object or an update
//! with a stale `resourceVersion` is not retried within the pass.

use crate::cluster::{ClusterError, ClusterStore, ObjectRef};
use crate::observability::metrics;
use kube::api::DynamicObject;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Created,
    Updated,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplyAction::Created => "created",
            ApplyAction::Updated => "updated",
        })
    }
}

/// Create `obj` when it did not exist, otherwise update it
pub async fn apply(
    target: &dyn ClusterStore,
    existed: bool,
    obj: &DynamicObject,
) -> Result<ApplyAction, ClusterError> {
    let object = ObjectRef::from_object(obj)?;
    let action = if existed {
        target.update(obj, false).await?;
        ApplyAction::Updated
    } else {
        target.create(obj).await?;
        ApplyAction::Created
    };
    metrics::increment_objects_applied(&action.to_string());
    info!(object = %object, action = %action, "sync.apply");
    Ok(action)
}
