//! In-memory [`ClusterStore`] used by tests and local dry runs.
//!
//! Mirrors the API server behaviours the sync engine relies on:
//! `resourceVersion` optimistic concurrency, not-found errors, create
//! validation, equality label selectors and status merge patches.

use super::{
    current_cluster_server, ClusterConnector, ClusterError, ClusterStore, ObjectRef,
    SharedClusterStore,
};
use crate::sync::merge::apply_merge_patch;
use async_trait::async_trait;
use kube::api::{DynamicObject, TypeMeta};
use kube::config::Kubeconfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Counts of persisted writes, dry runs excluded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub status_patches: usize,
}

impl StoreStats {
    /// Creates plus updates
    #[must_use]
    pub fn applies(&self) -> usize {
        self.creates + self.updates
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectRef, DynamicObject>,
    next_version: u64,
    stats: StoreStats,
}

#[derive(Debug, Default)]
pub struct InMemoryClusterStore {
    state: Mutex<State>,
}

impl InMemoryClusterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, ClusterError> {
        self.state
            .lock()
            .map_err(|e| ClusterError::Connect(format!("in-memory store poisoned: {e}")))
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.state.lock().map(|s| s.stats).unwrap_or_default()
    }

    /// Objects of one kind, in key order
    #[must_use]
    pub fn objects_of_kind(&self, kind: &str) -> Vec<DynamicObject> {
        self.state
            .lock()
            .map(|s| {
                s.objects
                    .iter()
                    .filter(|(k, _)| k.kind == kind)
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mutate a stored object in place, bumping its resourceVersion.
    ///
    /// Stands in for a write by some other client.
    pub fn modify(
        &self,
        target: &ObjectRef,
        change: impl FnOnce(&mut DynamicObject),
    ) -> Result<(), ClusterError> {
        let mut state = self.lock()?;
        let version = Self::bump(&mut state);
        let obj = state
            .objects
            .get_mut(target)
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))?;
        change(obj);
        obj.metadata.resource_version = Some(version);
        Ok(())
    }

    fn bump(state: &mut State) -> String {
        state.next_version += 1;
        state.next_version.to_string()
    }
}

fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
            {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn get(&self, target: &ObjectRef) -> Result<DynamicObject, ClusterError> {
        self.lock()?
            .objects
            .get(target)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let target = ObjectRef::from_object(obj)?;
        let mut state = self.lock()?;
        if state.objects.contains_key(&target) {
            return Err(ClusterError::Conflict {
                object: target.to_string(),
                message: "already exists".to_string(),
            });
        }
        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(Self::bump(&mut state));
        if stored.metadata.uid.is_none() {
            stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        state.objects.insert(target, stored.clone());
        state.stats.creates += 1;
        Ok(stored)
    }

    async fn update(
        &self,
        obj: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, ClusterError> {
        let target = ObjectRef::from_object(obj)?;
        let mut state = self.lock()?;
        let current = state
            .objects
            .get(&target)
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))?;
        if let Some(version) = obj.metadata.resource_version.as_deref() {
            if current.metadata.resource_version.as_deref() != Some(version) {
                return Err(ClusterError::Conflict {
                    object: target.to_string(),
                    message: format!(
                        "resourceVersion {version} is stale, current is {}",
                        current.metadata.resource_version.as_deref().unwrap_or("")
                    ),
                });
            }
        }

        let mut stored = obj.clone();
        stored.metadata.uid.clone_from(&current.metadata.uid);
        if dry_run {
            stored
                .metadata
                .resource_version
                .clone_from(&current.metadata.resource_version);
            return Ok(stored);
        }
        stored.metadata.resource_version = Some(Self::bump(&mut state));
        state.objects.insert(target, stored.clone());
        state.stats.updates += 1;
        Ok(stored)
    }

    async fn patch_status(
        &self,
        target: &ObjectRef,
        status: &serde_json::Value,
    ) -> Result<DynamicObject, ClusterError> {
        let mut state = self.lock()?;
        let version = Self::bump(&mut state);
        let obj = state
            .objects
            .get_mut(target)
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))?;
        let current = obj
            .data
            .get_mut("status")
            .filter(|s| s.is_object());
        match current {
            Some(existing) => apply_merge_patch(existing, status),
            None => {
                let mut fresh = serde_json::Value::Object(serde_json::Map::new());
                apply_merge_patch(&mut fresh, status);
                obj.data["status"] = fresh;
            }
        }
        obj.metadata.resource_version = Some(version);
        let updated = obj.clone();
        state.stats.status_patches += 1;
        Ok(updated)
    }

    async fn delete(&self, target: &ObjectRef) -> Result<(), ClusterError> {
        let mut state = self.lock()?;
        state
            .objects
            .remove(target)
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))?;
        state.stats.deletes += 1;
        Ok(())
    }

    async fn list(
        &self,
        types: &TypeMeta,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        Ok(self
            .lock()?
            .objects
            .iter()
            .filter(|(k, _)| k.api_version == types.api_version && k.kind == types.kind)
            .filter(|(k, _)| namespace.is_empty() || k.namespace == namespace)
            .filter(|(_, v)| matches_selector(v, label_selector))
            .map(|(_, v)| v.clone())
            .collect())
    }
}

/// Hands out in-memory stores keyed by the kubeconfig's current API server
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    clusters: HashMap<String, SharedClusterStore>,
}

impl InMemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cluster(mut self, server: impl Into<String>, store: SharedClusterStore) -> Self {
        self.clusters.insert(server.into(), store);
        self
    }
}

#[async_trait]
impl ClusterConnector for InMemoryConnector {
    async fn connect(
        &self,
        kubeconfig: Kubeconfig,
        _default_namespace: &str,
    ) -> Result<SharedClusterStore, ClusterError> {
        let server = current_cluster_server(&kubeconfig)
            .ok_or_else(|| ClusterError::Connect("kubeconfig has no current cluster".to_string()))?;
        self.clusters
            .get(&server)
            .cloned()
            .ok_or_else(|| ClusterError::Connect(format!("no cluster at {server}")))
    }
}
