//! Drift detection for one desired object.
//!
//! The live object is patched with the desired one (JSON merge patch, desired
//! fields win, live-only fields survive), the result is validated with a
//! dry-run update, and the dry-run result is compared with the live object
//! under [`canonical_eq`].

use super::merge::{apply_merge_patch, canonical_eq};
use crate::cluster::{ClusterError, ClusterStore, ObjectRef};
use kube::api::DynamicObject;
use tracing::debug;

/// Outcome of comparing one desired object with the cluster
#[derive(Debug, Clone)]
pub enum Drift {
    /// Live object already matches
    InSync,
    /// Nothing live; the desired object must be created
    Missing(DynamicObject),
    /// Live object differs; the merged object must be applied
    Diverged(DynamicObject),
}

impl Drift {
    #[must_use]
    pub fn is_in_sync(&self) -> bool {
        matches!(self, Drift::InSync)
    }
}

fn to_value(obj: &DynamicObject) -> Result<serde_json::Value, ClusterError> {
    serde_json::to_value(obj).map_err(|e| ClusterError::Invalid(e.to_string()))
}

/// Compare `desired` with its live counterpart on `target`
pub async fn compare(
    target: &dyn ClusterStore,
    desired: &DynamicObject,
) -> Result<Drift, ClusterError> {
    let object = ObjectRef::from_object(desired)?;
    let live = match target.get(&object).await {
        Ok(live) => live,
        Err(e) if e.is_not_found() => return Ok(Drift::Missing(desired.clone())),
        Err(e) => return Err(e),
    };

    let live_value = to_value(&live)?;
    let mut merged_value = live_value.clone();
    apply_merge_patch(&mut merged_value, &to_value(desired)?);
    let merged: DynamicObject = serde_json::from_value(merged_value)
        .map_err(|e| ClusterError::Invalid(format!("{object}: {e}")))?;

    let validated = target.update(&merged, true).await?;
    if canonical_eq(&to_value(&validated)?, &live_value) {
        debug!(object = %object, "drift.in_sync");
        Ok(Drift::InSync)
    } else {
        debug!(object = %object, "drift.diverged");
        Ok(Drift::Diverged(merged))
    }
}
