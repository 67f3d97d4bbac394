//! # DeployResource
//!
//! Ownership record for one live object created by a sync pass. Records live
//! in the Application's namespace on the controller's own cluster and are
//! listed by the `cd.tmax.io/application` label.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    kind = "DeployResource",
    group = "cd.tmax.io",
    version = "v1",
    namespaced,
    printcolumn = r#"{"name":"Application", "type":"string", "jsonPath":".spec.application"}"#,
    printcolumn = r#"{"name":"Kind", "type":"string", "jsonPath":".spec.kind"}"#,
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DeployResourceSpec {
    /// Name of the owning Application
    pub application: String,
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// Record name for a tracked object: `lower(app-kind-name-namespace)`.
///
/// Cluster-scoped objects have no namespace; the dangling separator is dropped
/// so the result stays a valid object name.
#[must_use]
pub fn deploy_resource_name(app_name: &str, kind: &str, name: &str, namespace: &str) -> String {
    format!("{app_name}-{kind}-{name}-{namespace}")
        .trim_end_matches('-')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_resource_name_is_lowercase() {
        assert_eq!(
            deploy_resource_name("Guestbook", "Service", "guestbook-ui", "default"),
            "guestbook-service-guestbook-ui-default"
        );
    }

    #[test]
    fn test_deploy_resource_name_with_empty_namespace() {
        assert_eq!(
            deploy_resource_name("app", "ClusterRole", "reader", ""),
            "app-clusterrole-reader"
        );
    }
}
