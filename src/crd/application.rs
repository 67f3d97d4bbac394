//! # Application
//!
//! The user-declared desired state: where the manifests live, which cluster
//! and namespace they go to, and how often drift is checked.

use super::status::{ApplicationStatus, SyncStatus, SyncStatusCode};
use crate::constants::DEFAULT_TARGET_REVISION;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Application Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: cd.tmax.io/v1
/// kind: Application
/// metadata:
///   name: guestbook
///   namespace: default
/// spec:
///   source:
///     repoURL: https://github.com/argoproj/argocd-example-apps
///     path: guestbook
///     targetRevision: master
///     type: PlainYAML
///   destination:
///     namespace: guestbook
///   syncPolicy:
///     autoSync: true
///     syncCheckPeriod: 60
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    kind = "Application",
    group = "cd.tmax.io",
    version = "v1",
    namespaced,
    status = "ApplicationStatus",
    shortname = "app",
    printcolumn = r#"{"name":"Sync", "type":"string", "jsonPath":".status.sync.status"}"#,
    printcolumn = r#"{"name":"Repo", "type":"string", "jsonPath":".spec.source.repoURL"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Git repository holding the manifests
    pub source: Source,
    /// Cluster and namespace the manifests are deployed into
    #[serde(default)]
    pub destination: Destination,
    /// Auto-sync flag and drift check period
    #[serde(default)]
    pub sync_policy: SyncPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Repository URL, e.g. `https://github.com/owner/repo`
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Path inside the repository (directory of manifests or chart root)
    #[serde(default)]
    pub path: String,
    /// Branch, tag or commit to read
    #[serde(default = "default_target_revision")]
    pub target_revision: String,
    /// How the path is turned into manifests
    #[serde(default, rename = "type")]
    pub source_type: SourceType,
    /// Access token for private repositories
    #[serde(default)]
    pub token: Option<GitToken>,
}

/// Manifest source type
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum SourceType {
    #[default]
    #[serde(rename = "PlainYAML")]
    PlainYaml,
    Helm,
    Kustomize,
    Ksonnet,
    Directory,
    Plugin,
}

impl SourceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::PlainYaml => "PlainYAML",
            SourceType::Helm => "Helm",
            SourceType::Kustomize => "Kustomize",
            SourceType::Ksonnet => "Ksonnet",
            SourceType::Directory => "Directory",
            SourceType::Plugin => "Plugin",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Git access token, either inline or read from a Secret in the Application's namespace
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitToken {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_from: Option<TokenSource>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenSource {
    pub secret_key_ref: SecretKeyRef,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Name of an external cluster; empty means the controller's own cluster.
    /// The kubeconfig is read from Secret `<name>-kubeconfig`.
    #[serde(default)]
    pub name: String,
    /// Namespace objects without one are deployed into
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    /// Apply corrections automatically instead of only reporting drift
    #[serde(default)]
    pub auto_sync: bool,
    /// Seconds between periodic drift checks; 0 means the controller default.
    /// At most one week.
    #[serde(default)]
    #[schemars(range(max = 604_800))]
    pub sync_check_period: u64,
}

fn default_target_revision() -> String {
    DEFAULT_TARGET_REVISION.to_string()
}

/// Scheduler and lock key of an Application
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppKey {
    pub name: String,
    pub namespace: String,
}

impl AppKey {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.namespace)
    }
}

impl Application {
    #[must_use]
    pub fn app_key(&self) -> AppKey {
        AppKey::new(self.name_any(), self.namespace().unwrap_or_default())
    }

    /// Value of the ownership label carried by this Application's DeployResources
    #[must_use]
    pub fn ownership_label(&self) -> String {
        format!(
            "{}-{}",
            self.name_any(),
            self.namespace().unwrap_or_default()
        )
    }

    /// Effective drift check period
    #[must_use]
    pub fn sync_check_period(&self) -> Duration {
        Duration::from_secs(self.spec.sync_policy.sync_check_period)
    }

    /// Namespace Helm renders into
    #[must_use]
    pub fn helm_namespace(&self) -> &str {
        if self.spec.destination.namespace.is_empty() {
            "default"
        } else {
            &self.spec.destination.namespace
        }
    }

    /// Fill in the period and sync status a freshly created Application lacks.
    ///
    /// Returns `true` when the status was initialised and needs persisting.
    pub fn apply_defaults(&mut self, default_period: Duration) -> bool {
        if self.spec.sync_policy.sync_check_period == 0 {
            self.spec.sync_policy.sync_check_period = default_period.as_secs().max(1);
        }

        let status = self.status.get_or_insert_with(ApplicationStatus::default);
        if status.sync.is_none() {
            status.sync = Some(SyncStatus {
                status: SyncStatusCode::Unknown,
                time_check: 0,
            });
            return true;
        }
        false
    }

    /// Current sync status code, `Unknown` when none was recorded yet
    #[must_use]
    pub fn sync_status(&self) -> SyncStatusCode {
        self.status
            .as_ref()
            .and_then(|s| s.sync.as_ref())
            .map_or(SyncStatusCode::Unknown, |s| s.status)
    }

    /// Address git hosts deliver push events to
    #[must_use]
    pub fn webhook_url(&self, host: &str) -> String {
        format!(
            "http://{host}/webhook/{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Webhook secret stored in status, if generated
    #[must_use]
    pub fn webhook_secret(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.secrets.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(period: u64) -> Application {
        let mut app = Application::new(
            "guestbook",
            ApplicationSpec {
                source: Source {
                    repo_url: "https://github.com/argoproj/argocd-example-apps".to_string(),
                    path: "guestbook".to_string(),
                    target_revision: "master".to_string(),
                    source_type: SourceType::PlainYaml,
                    token: None,
                },
                destination: Destination::default(),
                sync_policy: SyncPolicy {
                    auto_sync: true,
                    sync_check_period: period,
                },
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app
    }

    #[test]
    fn test_app_key_and_label() {
        let app = app(30);
        assert_eq!(app.app_key().to_string(), "guestbook/default");
        assert_eq!(app.ownership_label(), "guestbook-default");
    }

    #[test]
    fn test_apply_defaults_sets_period_and_status() {
        let mut app = app(0);
        assert!(app.apply_defaults(Duration::from_secs(60)));
        assert_eq!(app.sync_check_period(), Duration::from_secs(60));
        assert_eq!(app.sync_status(), SyncStatusCode::Unknown);
        let sync = app.status.as_ref().and_then(|s| s.sync.as_ref()).unwrap();
        assert_eq!(sync.time_check, 0);

        // Second pass changes nothing
        assert!(!app.apply_defaults(Duration::from_secs(60)));
    }

    #[test]
    fn test_apply_defaults_keeps_explicit_period() {
        let mut app = app(30);
        app.apply_defaults(Duration::from_secs(60));
        assert_eq!(app.sync_check_period(), Duration::from_secs(30));
    }

    #[test]
    fn test_webhook_url() {
        assert_eq!(
            app(30).webhook_url("cd.example.com"),
            "http://cd.example.com/webhook/default/guestbook"
        );
    }

    #[test]
    fn test_helm_namespace_falls_back_to_default() {
        let mut app = app(30);
        assert_eq!(app.helm_namespace(), "default");
        app.spec.destination.namespace = "prod".to_string();
        assert_eq!(app.helm_namespace(), "prod");
    }

    #[test]
    fn test_spec_deserializes_from_manifest() {
        let yaml = r"
source:
  repoURL: https://github.com/owner/repo
  path: charts/app
  type: Helm
  token:
    valueFrom:
      secretKeyRef:
        name: git-token
        key: token
destination:
  name: edge
  namespace: apps
syncPolicy:
  autoSync: false
";
        let spec: ApplicationSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.source.source_type, SourceType::Helm);
        assert_eq!(spec.source.target_revision, "main");
        assert_eq!(spec.destination.name, "edge");
        assert_eq!(spec.sync_policy.sync_check_period, 0);
        let token = spec.source.token.unwrap();
        assert_eq!(token.value_from.unwrap().secret_key_ref.name, "git-token");
    }

    #[test]
    fn test_schema_caps_sync_check_period() {
        let schema = serde_json::to_value(schemars::schema_for!(SyncPolicy)).unwrap();
        let maximum = &schema["properties"]["syncCheckPeriod"]["maximum"];
        assert_eq!(maximum.as_f64(), Some(604_800.0));
        assert_eq!(crate::constants::MAX_SYNC_CHECK_PERIOD_SECS, 604_800);
    }

    #[test]
    fn test_source_type_defaults_to_plain_yaml() {
        let spec: ApplicationSpec =
            serde_json::from_value(serde_json::json!({"source": {"repoURL": "https://h/o/r"}}))
                .unwrap();
        assert_eq!(spec.source.source_type, SourceType::PlainYaml);
        assert_eq!(spec.source.source_type.to_string(), "PlainYAML");
    }
}
