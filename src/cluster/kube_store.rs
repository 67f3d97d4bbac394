//! Kube-backed [`ClusterStore`] over `Api<DynamicObject>` with discovery.

use super::{
    current_cluster_server, gvk_of, ClusterConnector, ClusterError, ClusterStore, ObjectRef,
    SharedClusterStore,
};
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams, TypeMeta,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiCapabilities, Scope};
use kube::{Client, Config};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Cluster store talking to a real API server
pub struct KubeClusterStore {
    client: Client,
    default_namespace: String,
    timeout: Duration,
    discovery: RwLock<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl std::fmt::Debug for KubeClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterStore")
            .field("default_namespace", &self.default_namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeClusterStore {
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        let default_namespace = client.default_namespace().to_string();
        Self {
            client,
            default_namespace,
            timeout,
            discovery: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a kind to its API resource, caching discovery results
    async fn resource(
        &self,
        types: &TypeMeta,
        object: &ObjectRef,
    ) -> Result<(ApiResource, ApiCapabilities), ClusterError> {
        let gvk = gvk_of(types);
        if let Some(found) = self.discovery.read().await.get(&gvk) {
            return Ok(found.clone());
        }

        let resolved = self
            .with_timeout(
                "discovery",
                kube::discovery::pinned_kind(&self.client, &gvk),
                object,
            )
            .await?;
        debug!(
            group = %gvk.group,
            version = %gvk.version,
            kind = %gvk.kind,
            plural = %resolved.0.plural,
            "cluster.discovery.resolved"
        );
        self.discovery.write().await.insert(gvk, resolved.clone());
        Ok(resolved)
    }

    async fn api_for(&self, object: &ObjectRef) -> Result<Api<DynamicObject>, ClusterError> {
        let (resource, caps) = self.resource(&object.type_meta(), object).await?;
        Ok(self.scoped_api(&resource, &caps, &object.namespace))
    }

    fn scoped_api(
        &self,
        resource: &ApiResource,
        caps: &ApiCapabilities,
        namespace: &str,
    ) -> Api<DynamicObject> {
        match caps.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), resource),
            Scope::Namespaced if namespace.is_empty() => {
                Api::namespaced_with(self.client.clone(), &self.default_namespace, resource)
            }
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, resource),
        }
    }

    async fn with_timeout<T, F>(
        &self,
        operation: &'static str,
        call: F,
        object: &ObjectRef,
    ) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| ClusterError::from_kube(e, object)),
            Err(_elapsed) => Err(ClusterError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get(&self, target: &ObjectRef) -> Result<DynamicObject, ClusterError> {
        let api = self.api_for(target).await?;
        self.with_timeout("get", api.get(&target.name), target).await
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let target = ObjectRef::from_object(obj)?;
        let api = self.api_for(&target).await?;
        self.with_timeout("create", api.create(&PostParams::default(), obj), &target)
            .await
    }

    async fn update(
        &self,
        obj: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, ClusterError> {
        let target = ObjectRef::from_object(obj)?;
        let api = self.api_for(&target).await?;
        let params = PostParams {
            dry_run,
            ..PostParams::default()
        };
        self.with_timeout("update", api.replace(&target.name, &params, obj), &target)
            .await
    }

    async fn patch_status(
        &self,
        target: &ObjectRef,
        status: &serde_json::Value,
    ) -> Result<DynamicObject, ClusterError> {
        let api = self.api_for(target).await?;
        let patch = Patch::Merge(serde_json::json!({ "status": status }));
        self.with_timeout(
            "patch_status",
            api.patch_status(&target.name, &PatchParams::default(), &patch),
            target,
        )
        .await
    }

    async fn delete(&self, target: &ObjectRef) -> Result<(), ClusterError> {
        let api = self.api_for(target).await?;
        self.with_timeout(
            "delete",
            api.delete(&target.name, &DeleteParams::background()),
            target,
        )
        .await
        .map(|_| ())
    }

    async fn list(
        &self,
        types: &TypeMeta,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let target = ObjectRef::new(
            types.api_version.clone(),
            types.kind.clone(),
            namespace,
            "*",
        );
        let (resource, caps) = self.resource(types, &target).await?;
        let api = if namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            self.scoped_api(&resource, &caps, namespace)
        };
        let params = ListParams::default().labels(label_selector);
        let list = self.with_timeout("list", api.list(&params), &target).await?;
        // List items come back without apiVersion/kind
        Ok(list
            .items
            .into_iter()
            .map(|mut item| {
                item.types = Some(types.clone());
                item
            })
            .collect())
    }
}

/// Connects to external clusters described by kubeconfig documents
#[derive(Debug, Clone)]
pub struct KubeConnector {
    timeout: Duration,
}

impl KubeConnector {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(
        &self,
        kubeconfig: Kubeconfig,
        default_namespace: &str,
    ) -> Result<SharedClusterStore, ClusterError> {
        let server = current_cluster_server(&kubeconfig).unwrap_or_default();
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Connect(e.to_string()))?;
        if !default_namespace.is_empty() {
            config.default_namespace = default_namespace.to_string();
        }
        let client = Client::try_from(config).map_err(|e| ClusterError::Connect(e.to_string()))?;
        debug!(server = %server, namespace = %default_namespace, "cluster.connect");
        Ok(Arc::new(KubeClusterStore::new(client, self.timeout)))
    }
}
