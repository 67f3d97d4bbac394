//! # DeployResource Tracking
//!
//! Keeps one [`DeployResource`] record per object an Application owns, in
//! the Application's namespace on the controller's cluster. Records carry the
//! `cd.tmax.io/application=<app>-<namespace>` label so a pass can list what it
//! owned before and garbage-collect whatever it no longer produces.

use super::error::SyncError;
use crate::cluster::{from_dynamic, to_dynamic, ClusterError, ClusterStore, ObjectRef, SharedClusterStore};
use crate::constants::APPLICATION_LABEL;
use crate::crd::{deploy_resource_name, Application, DeployResource, DeployResourceSpec};
use crate::observability::metrics;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DeployResourceTracker {
    store: SharedClusterStore,
}

impl DeployResourceTracker {
    /// `store` is where records are kept, the controller's own cluster
    pub fn new(store: SharedClusterStore) -> Self {
        Self { store }
    }

    /// Record an Application should hold for `object`
    #[must_use]
    pub fn record_for(app: &Application, object: &ObjectRef) -> DeployResource {
        let app_name = app.name_any();
        let mut record = DeployResource::new(
            &deploy_resource_name(&app_name, &object.kind, &object.name, &object.namespace),
            DeployResourceSpec {
                application: app_name,
                api_version: object.api_version.clone(),
                kind: object.kind.clone(),
                name: object.name.clone(),
                namespace: object.namespace.clone(),
            },
        );
        record.metadata.namespace = app.namespace();
        record.metadata.labels = Some(BTreeMap::from([(
            APPLICATION_LABEL.to_string(),
            app.ownership_label(),
        )]));
        record
    }

    /// Records currently labelled for `app`
    pub async fn list(&self, app: &Application) -> Result<Vec<DeployResource>, ClusterError> {
        let selector = format!("{APPLICATION_LABEL}={}", app.ownership_label());
        let types = ObjectRef::of::<DeployResource>("", "").type_meta();
        self.store
            .list(&types, &app.namespace().unwrap_or_default(), &selector)
            .await?
            .iter()
            .map(from_dynamic)
            .collect()
    }

    /// Create or refresh the record for `object`. Idempotent.
    pub async fn track(
        &self,
        app: &Application,
        object: &ObjectRef,
    ) -> Result<DeployResource, ClusterError> {
        let mut record = Self::record_for(app, object);
        let record_ref = ObjectRef::of::<DeployResource>(
            record.namespace().unwrap_or_default(),
            record.name_any(),
        );

        match self.store.get(&record_ref).await {
            Ok(existing) => {
                let existing: DeployResource = from_dynamic(&existing)?;
                if existing.spec == record.spec && existing.labels() == record.labels() {
                    return Ok(existing);
                }
                record
                    .metadata
                    .resource_version
                    .clone_from(&existing.metadata.resource_version);
                let updated = self.store.update(&to_dynamic(&record)?, false).await?;
                debug!(record = %record_ref, "tracker.updated");
                from_dynamic(&updated)
            }
            Err(e) if e.is_not_found() => {
                let created = self.store.create(&to_dynamic(&record)?).await?;
                debug!(record = %record_ref, "tracker.created");
                from_dynamic(&created)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a record, then its live object on `target`. Missing objects are fine.
    pub async fn delete(
        &self,
        record: &DeployResource,
        target: &dyn ClusterStore,
    ) -> Result<(), ClusterError> {
        let record_ref = ObjectRef::of::<DeployResource>(
            record.namespace().unwrap_or_default(),
            record.name_any(),
        );
        ignore_not_found(self.store.delete(&record_ref).await)?;
        let live = tracked_object(record);
        ignore_not_found(target.delete(&live).await)?;
        info!(object = %live, "tracker.pruned");
        Ok(())
    }

    /// Delete every record in `old` whose name is not in `tracked`, with its live object.
    ///
    /// Returns the pruned objects.
    pub async fn gc(
        &self,
        app: &Application,
        old: &[DeployResource],
        tracked: &HashSet<String>,
        target: &dyn ClusterStore,
    ) -> Result<Vec<ObjectRef>, SyncError> {
        let mut pruned = Vec::new();
        for record in old.iter().filter(|r| !tracked.contains(&r.name_any())) {
            let object = tracked_object(record);
            self.delete(record, target)
                .await
                .map_err(|source| SyncError::Gc {
                    app: app.app_key().to_string(),
                    object: object.to_string(),
                    source,
                })?;
            pruned.push(object);
        }
        metrics::increment_objects_pruned(pruned.len());
        Ok(pruned)
    }

    /// Delete every record of `app` and its live object
    pub async fn clear(
        &self,
        app: &Application,
        target: &dyn ClusterStore,
    ) -> Result<Vec<ObjectRef>, SyncError> {
        let records = self.list(app).await.map_err(|source| SyncError::Gc {
            app: app.app_key().to_string(),
            object: DeployResource::kind(&()).to_string(),
            source,
        })?;
        self.gc(app, &records, &HashSet::new(), target).await
    }
}

/// Live object a record points at
#[must_use]
pub fn tracked_object(record: &DeployResource) -> ObjectRef {
    ObjectRef::new(
        record.spec.api_version.clone(),
        record.spec.kind.clone(),
        record.spec.namespace.clone(),
        record.spec.name.clone(),
    )
}

fn ignore_not_found(result: Result<(), ClusterError>) -> Result<(), ClusterError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
