//! # Cluster Store
//!
//! The cluster API behind a trait so the sync engine can run against the
//! controller's own cluster, an external cluster built from a kubeconfig
//! Secret, or an in-memory store in tests.
//!
//! Objects cross the trait as [`DynamicObject`]s. Typed resources are
//! converted with [`to_dynamic`] / [`from_dynamic`].

mod kube_store;
mod memory;

pub use kube_store::{KubeClusterStore, KubeConnector};
pub use memory::{InMemoryClusterStore, InMemoryConnector, StoreStats};

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind, TypeMeta};
use kube::config::Kubeconfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared handle to a cluster
pub type SharedClusterStore = Arc<dyn ClusterStore>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict on {object}: {message}")]
    Conflict { object: String, message: String },
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("cluster connection error: {0}")]
    Connect(String),
    #[error("cluster API error ({code}): {message}")]
    Api { code: u16, message: String },
}

impl ClusterError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }

    /// Map a kube client error for a call against `object`
    pub(crate) fn from_kube(error: kube::Error, object: &ObjectRef) -> Self {
        match error {
            kube::Error::Api(api_err) if api_err.code == 404 => {
                ClusterError::NotFound(object.to_string())
            }
            kube::Error::Api(api_err) if api_err.code == 409 => ClusterError::Conflict {
                object: object.to_string(),
                message: api_err.message.clone(),
            },
            kube::Error::Api(api_err) if api_err.code == 400 || api_err.code == 422 => {
                ClusterError::Invalid(format!("{object}: {}", api_err.message))
            }
            kube::Error::Api(api_err) => ClusterError::Api {
                code: api_err.code,
                message: api_err.message.clone(),
            },
            other => ClusterError::Api {
                code: 0,
                message: other.to_string(),
            },
        }
    }
}

/// Identity of one cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    /// Empty for cluster-scoped objects
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Reference for a typed resource
    pub fn of<K>(namespace: impl Into<String>, name: impl Into<String>) -> Self
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Self::new(K::api_version(&()), K::kind(&()), namespace, name)
    }

    /// Reference to an unstructured object; kind, apiVersion and name are required
    pub fn from_object(obj: &DynamicObject) -> Result<Self, ClusterError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| ClusterError::Invalid("object has no apiVersion/kind".to_string()))?;
        if types.kind.is_empty() {
            return Err(ClusterError::Invalid("object is missing kind".to_string()));
        }
        if types.api_version.is_empty() {
            return Err(ClusterError::Invalid(format!(
                "{} is missing apiVersion",
                types.kind
            )));
        }
        let name = obj
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ClusterError::Invalid(format!("{} is missing metadata.name", types.kind)))?;
        Ok(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name,
        })
    }

    #[must_use]
    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
        }
    }

    #[must_use]
    pub fn gvk(&self) -> GroupVersionKind {
        gvk_of(&self.type_meta())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

pub(crate) fn gvk_of(types: &TypeMeta) -> GroupVersionKind {
    match types.api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, &types.kind),
        None => GroupVersionKind::gvk("", &types.api_version, &types.kind),
    }
}

/// CRUD and label listing over cluster objects, keyed by namespace/name.
///
/// Updates carry the object's `resourceVersion`; a stale one fails with
/// [`ClusterError::Conflict`].
#[async_trait]
pub trait ClusterStore: Send + Sync + fmt::Debug {
    async fn get(&self, target: &ObjectRef) -> Result<DynamicObject, ClusterError>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError>;

    /// Replace an existing object. With `dry_run` the server validates and
    /// returns the would-be result without persisting it.
    async fn update(&self, obj: &DynamicObject, dry_run: bool)
        -> Result<DynamicObject, ClusterError>;

    /// Merge `status` into the object's status subresource
    async fn patch_status(
        &self,
        target: &ObjectRef,
        status: &serde_json::Value,
    ) -> Result<DynamicObject, ClusterError>;

    async fn delete(&self, target: &ObjectRef) -> Result<(), ClusterError>;

    /// List objects of one kind. An empty namespace lists across all namespaces.
    async fn list(
        &self,
        types: &TypeMeta,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;
}

/// Builds a store bound to an external cluster from its kubeconfig
#[async_trait]
pub trait ClusterConnector: Send + Sync + fmt::Debug {
    async fn connect(
        &self,
        kubeconfig: Kubeconfig,
        default_namespace: &str,
    ) -> Result<SharedClusterStore, ClusterError>;
}

/// API server URL of the kubeconfig's current context
#[must_use]
pub fn current_cluster_server(kubeconfig: &Kubeconfig) -> Option<String> {
    let context_name = kubeconfig.current_context.as_deref()?;
    let cluster_name = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == context_name)?
        .context
        .as_ref()?
        .cluster
        .clone();
    kubeconfig
        .clusters
        .iter()
        .find(|c| c.name == cluster_name)?
        .cluster
        .as_ref()?
        .server
        .clone()
}

/// Convert a typed resource into its unstructured form
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, ClusterError> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| ClusterError::Invalid(e.to_string()))
}

/// Convert an unstructured object into a typed resource
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, ClusterError> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| ClusterError::Invalid(e.to_string()))
}

/// Fetch and decode a typed resource
pub async fn get_typed<K>(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
) -> Result<K, ClusterError>
where
    K: kube::Resource<DynamicType = ()> + DeserializeOwned,
{
    let obj = store.get(&ObjectRef::of::<K>(namespace, name)).await?;
    from_dynamic(&obj)
}
