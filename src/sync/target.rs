//! Destination cluster resolution.
//!
//! An empty destination name targets the controller's own cluster. Any other
//! name is looked up as Secret `<name>-kubeconfig` in the Application's
//! namespace, whose `value` entry holds a kubeconfig document. The store is
//! rebuilt on every pass; nothing is cached.

use super::error::TargetError;
use crate::cluster::{get_typed, ClusterConnector, SharedClusterStore};
use crate::constants::{KUBECONFIG_SECRET_KEY, KUBECONFIG_SECRET_SUFFIX};
use crate::crd::Application;
use k8s_openapi::api::core::v1::Secret;
use kube::config::Kubeconfig;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TargetResolver {
    default_store: SharedClusterStore,
    connector: Arc<dyn ClusterConnector>,
}

impl TargetResolver {
    pub fn new(default_store: SharedClusterStore, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            default_store,
            connector,
        }
    }

    /// Store for the controller's own cluster
    #[must_use]
    pub fn default_store(&self) -> &SharedClusterStore {
        &self.default_store
    }

    pub async fn resolve(&self, app: &Application) -> Result<SharedClusterStore, TargetError> {
        let destination = &app.spec.destination;
        if destination.name.is_empty() {
            return Ok(Arc::clone(&self.default_store));
        }

        let secret_name = format!("{}{KUBECONFIG_SECRET_SUFFIX}", destination.name);
        let namespace = app.namespace().unwrap_or_default();
        let secret: Secret = get_typed(self.default_store.as_ref(), &namespace, &secret_name)
            .await
            .map_err(|source| TargetError::SecretNotFound {
                secret: secret_name.clone(),
                source,
            })?;

        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| TargetError::MissingKubeconfig {
                secret: secret_name.clone(),
                key: KUBECONFIG_SECRET_KEY,
            })?;
        let text = std::str::from_utf8(&raw.0).map_err(|e| TargetError::InvalidKubeconfig {
            secret: secret_name.clone(),
            message: e.to_string(),
        })?;
        let kubeconfig =
            Kubeconfig::from_yaml(text).map_err(|e| TargetError::InvalidKubeconfig {
                secret: secret_name.clone(),
                message: e.to_string(),
            })?;

        debug!(app = %app.app_key(), cluster = %destination.name, "target.resolve");
        self.connector
            .connect(kubeconfig, &destination.namespace)
            .await
            .map_err(|source| TargetError::Connect {
                cluster: destination.name.clone(),
                source,
            })
    }
}
