//! # Manifest Resolution
//!
//! Turns an Application's source into the set of desired objects.
//!
//! - **PlainYAML**: walks the source path through the [`GitProvider`],
//!   descending into directories, and parses every file as multi-document YAML
//! - **Helm**: keeps a clone of the repository under the cache directory and
//!   renders the chart at the source path with `helm template`
//!
//! Resolution is all-or-nothing: the first fetch or parse error aborts it.

use super::error::SourceError;
use super::locks::KeyedLocks;
use crate::cluster::{get_typed, ClusterStore};
use crate::config::ControllerConfig;
use crate::crd::{Application, SourceType};
use crate::git::cli::GitCli;
use crate::git::{EntryType, GitProvider, GitProviderRegistry};
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Parse a multi-document YAML stream into objects.
///
/// Empty documents are skipped. Objects without a namespace get
/// `default_namespace` when it is non-empty.
pub fn parse_manifests(
    bytes: &[u8],
    origin: &str,
    default_namespace: &str,
) -> Result<Vec<DynamicObject>, SourceError> {
    let parse_error = |message: String| SourceError::Parse {
        origin: origin.to_string(),
        message,
    };

    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(bytes) {
        let value =
            serde_json::Value::deserialize(document).map_err(|e| parse_error(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        if !value.is_object() {
            return Err(parse_error("document is not a mapping".to_string()));
        }
        let mut obj: DynamicObject =
            serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))?;
        if obj.metadata.namespace.as_deref().unwrap_or_default().is_empty()
            && !default_namespace.is_empty()
        {
            obj.metadata.namespace = Some(default_namespace.to_string());
        }
        objects.push(obj);
    }
    Ok(objects)
}

/// Git token of the Application: inline value or a key of a Secret in its namespace.
///
/// An empty token means unauthenticated access.
pub async fn resolve_git_token(
    app: &Application,
    store: &dyn ClusterStore,
) -> Result<Option<Zeroizing<String>>, SourceError> {
    let Some(token) = app.spec.source.token.as_ref() else {
        return Ok(None);
    };
    if let Some(value) = token.value.as_deref().filter(|v| !v.is_empty()) {
        return Ok(Some(Zeroizing::new(value.to_string())));
    }
    let Some(source) = token.value_from.as_ref() else {
        return Ok(None);
    };

    let key_ref = &source.secret_key_ref;
    let secret_error = |message: String| SourceError::TokenSecret {
        secret: key_ref.name.clone(),
        key: key_ref.key.clone(),
        message,
    };
    let namespace = app.namespace().unwrap_or_default();
    let secret: Secret = get_typed(store, &namespace, &key_ref.name)
        .await
        .map_err(|e| secret_error(e.to_string()))?;
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&key_ref.key))
        .ok_or_else(|| secret_error("key not present".to_string()))?;
    let value = String::from_utf8(bytes.0.clone())
        .map_err(|_e| secret_error("value is not UTF-8".to_string()))?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| Zeroizing::new(value.to_string())))
}

/// Reads plain manifests through the repository's [`GitProvider`]
#[derive(Debug)]
pub struct PlainYamlSyncer {
    registry: Arc<GitProviderRegistry>,
}

impl PlainYamlSyncer {
    #[must_use]
    pub fn new(registry: Arc<GitProviderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn manifests(
        &self,
        app: &Application,
        token: Option<Zeroizing<String>>,
    ) -> Result<Vec<DynamicObject>, SourceError> {
        let source = &app.spec.source;
        let provider = self.registry.provider_for(&source.repo_url, token)?;
        let urls = collect_file_urls(provider.as_ref(), &source.path, &source.target_revision).await?;
        debug!(app = %app.app_key(), files = urls.len(), "manifest.plain_yaml.files");

        let mut objects = Vec::new();
        for url in urls {
            let body = provider.get_raw(&url).await?;
            objects.extend(parse_manifests(
                &body,
                &url,
                &app.spec.destination.namespace,
            )?);
        }
        Ok(objects)
    }
}

/// Download URLs of every file under `path`, files of a directory before its subdirectories
async fn collect_file_urls(
    provider: &dyn GitProvider,
    path: &str,
    revision: &str,
) -> Result<Vec<String>, SourceError> {
    let mut urls = Vec::new();
    let mut pending = vec![path.to_string()];
    while let Some(dir) = pending.pop() {
        let entries = provider.list_contents(&dir, revision).await?;
        let mut subdirs = Vec::new();
        for entry in entries {
            match entry.entry_type {
                EntryType::File => {
                    if let Some(url) = entry.download_url {
                        urls.push(url);
                    }
                }
                EntryType::Dir => subdirs.push(entry.path),
                EntryType::Other => {}
            }
        }
        pending.extend(subdirs.into_iter().rev());
    }
    Ok(urls)
}

/// Renders Helm charts from a local clone
#[derive(Debug)]
pub struct HelmSyncer {
    git: GitCli,
    helm_binary: String,
    cache_dir: PathBuf,
    timeout: Duration,
    /// Keyed by checkout path, the resource git and helm actually share
    locks: KeyedLocks<PathBuf>,
}

impl HelmSyncer {
    pub fn new(
        git: GitCli,
        helm_binary: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            git,
            helm_binary: helm_binary.into(),
            cache_dir: cache_dir.into(),
            timeout,
            locks: KeyedLocks::new(),
        }
    }

    /// Local clone of the Application's repository, `<cache>/<namespace>/<name>`
    #[must_use]
    pub fn checkout_path(&self, app: &Application) -> PathBuf {
        let key = app.app_key();
        self.cache_dir.join(&key.namespace).join(&key.name)
    }

    pub async fn manifests(
        &self,
        app: &Application,
        token: Option<Zeroizing<String>>,
    ) -> Result<Vec<DynamicObject>, SourceError> {
        let checkout = self.checkout_path(app);
        let lock = self.locks.lock_for(&checkout);
        let _guard = lock.lock().await;

        let source = &app.spec.source;
        self.git
            .sync_checkout(
                &source.repo_url,
                token.as_ref().map(|t| t.as_str()),
                &source.target_revision,
                &checkout,
            )
            .await?;

        let chart_dir = checkout.join(source.path.trim_matches('/'));
        let rendered = self.render(app, &chart_dir).await?;
        parse_manifests(
            rendered.as_bytes(),
            &chart_dir.display().to_string(),
            &app.spec.destination.namespace,
        )
    }

    async fn render(&self, app: &Application, chart_dir: &Path) -> Result<String, SourceError> {
        let release = app.ownership_label();
        let chart = chart_dir.display().to_string();
        let render_error = |message: String| SourceError::Render {
            chart: chart.clone(),
            message,
        };

        let mut cmd = Command::new(&self.helm_binary);
        cmd.arg("template")
            .arg(&release)
            .arg(chart_dir)
            .arg("--namespace")
            .arg(app.helm_namespace())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_elapsed| render_error(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| render_error(e.to_string()))?;
        if !output.status.success() {
            return Err(render_error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        info!(app = %app.app_key(), release = %release, "manifest.helm.rendered");
        String::from_utf8(output.stdout).map_err(|e| render_error(e.to_string()))
    }

    /// Remove the local clone
    pub async fn clear(&self, app: &Application) -> Result<(), SourceError> {
        let checkout = self.checkout_path(app);
        let lock = self.locks.lock_for(&checkout);
        {
            let _guard = lock.lock().await;
            match tokio::fs::remove_dir_all(&checkout).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.locks.forget(&checkout);
        Ok(())
    }
}

/// Manifest strategy for one source type
#[derive(Debug, Clone, Copy)]
pub enum Syncer<'a> {
    PlainYaml(&'a PlainYamlSyncer),
    Helm(&'a HelmSyncer),
}

impl Syncer<'_> {
    pub async fn manifests(
        &self,
        app: &Application,
        token: Option<Zeroizing<String>>,
    ) -> Result<Vec<DynamicObject>, SourceError> {
        match self {
            Syncer::PlainYaml(syncer) => syncer.manifests(app, token).await,
            Syncer::Helm(syncer) => syncer.manifests(app, token).await,
        }
    }
}

/// Picks the [`Syncer`] for an Application's source type
#[derive(Debug)]
pub struct ManifestResolver {
    plain_yaml: PlainYamlSyncer,
    helm: HelmSyncer,
}

impl ManifestResolver {
    #[must_use]
    pub fn new(plain_yaml: PlainYamlSyncer, helm: HelmSyncer) -> Self {
        Self { plain_yaml, helm }
    }

    #[must_use]
    pub fn from_config(config: &ControllerConfig, registry: Arc<GitProviderRegistry>) -> Self {
        let timeout = config.git_call_timeout();
        Self::new(
            PlainYamlSyncer::new(registry),
            HelmSyncer::new(
                GitCli::new(config.git_binary.clone(), timeout),
                config.helm_binary.clone(),
                config.repo_cache_dir.clone(),
                timeout,
            ),
        )
    }

    pub fn syncer_for(&self, source_type: SourceType) -> Result<Syncer<'_>, SourceError> {
        match source_type {
            SourceType::PlainYaml => Ok(Syncer::PlainYaml(&self.plain_yaml)),
            SourceType::Helm => Ok(Syncer::Helm(&self.helm)),
            other => Err(SourceError::UnsupportedType(other.to_string())),
        }
    }

    /// Desired objects of `app`. `store` holds the token Secret, if any.
    pub async fn resolve(
        &self,
        app: &Application,
        store: &dyn ClusterStore,
    ) -> Result<Vec<DynamicObject>, SourceError> {
        let syncer = self.syncer_for(app.spec.source.source_type)?;
        let token = resolve_git_token(app, store).await?;
        syncer.manifests(app, token).await
    }

    /// Release local state kept for `app`
    pub async fn clear(&self, app: &Application) -> Result<(), SourceError> {
        if app.spec.source.source_type == SourceType::Helm {
            self.helm.clear(app).await?;
        }
        Ok(())
    }
}
