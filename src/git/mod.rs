//! # Git
//!
//! Access to git-hosted manifests.
//!
//! - [`GitProvider`]: lists a repository path and fetches raw file content
//! - [`GitProviderRegistry`]: picks the provider implementation for a repository host
//! - [`contents`]: GitHub-compatible contents REST API provider
//! - [`cli`]: local clone/refresh through the git binary (Helm charts need a working tree)
//! - [`webhook`]: push event parsing and signature validation
//! - [`memory`]: static in-memory provider for tests

pub mod cli;
pub mod contents;
pub mod memory;
pub mod webhook;

use crate::constants::{GITHUB_API_BASE, GITHUB_HOST};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("path {0} not found in repository")]
    NotFound(String),
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
    #[error("invalid repository URL {url}: {reason}")]
    InvalidRepoUrl { url: String, reason: String },
    #[error("no git provider registered for host {0}")]
    UnknownHost(String),
}

impl GitError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, GitError::NotFound(_))
    }
}

/// Kind of a repository tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
    #[serde(other)]
    Other,
}

/// One entry of a repository directory listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Read access to one repository
#[async_trait]
pub trait GitProvider: Send + Sync + fmt::Debug {
    /// List `path` at `revision`. A file path yields a single entry.
    async fn list_contents(
        &self,
        path: &str,
        revision: &str,
    ) -> Result<Vec<ContentEntry>, GitError>;

    /// Fetch raw file content from a download URL returned by `list_contents`
    async fn get_raw(&self, url: &str) -> Result<Vec<u8>, GitError>;
}

/// A repository URL split into host and `owner/repo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    pub url: String,
    pub host: String,
    pub full_name: String,
}

impl RepoLocation {
    /// Parse `https://host/owner/repo[.git]`
    pub fn parse(repo_url: &str) -> Result<Self, GitError> {
        let invalid = |reason: &str| GitError::InvalidRepoUrl {
            url: repo_url.to_string(),
            reason: reason.to_string(),
        };
        let parsed = url::Url::parse(repo_url).map_err(|e| invalid(&e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| invalid("missing host"))?
            .to_lowercase();
        let host = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        let full_name = parsed
            .path()
            .trim_matches('/')
            .trim_end_matches(".git")
            .to_string();
        if full_name.split('/').filter(|s| !s.is_empty()).count() < 2 {
            return Err(invalid("expected https://host/owner/repo"));
        }
        Ok(Self {
            url: repo_url.to_string(),
            host,
            full_name,
        })
    }

    /// `host/owner/repo`, lowercased, for matching webhook payloads
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.host, self.full_name).to_lowercase()
    }
}

/// Creates a provider bound to one repository and token
pub trait GitProviderFactory: Send + Sync + fmt::Debug {
    fn build(
        &self,
        repo: &RepoLocation,
        token: Option<Zeroizing<String>>,
    ) -> Result<Arc<dyn GitProvider>, GitError>;
}

/// Host → provider factory lookup.
///
/// Hosts without an explicit entry fall back to the GitHub-compatible
/// contents API at `https://<host>/api/v3`.
#[derive(Debug, Default)]
pub struct GitProviderRegistry {
    providers: HashMap<String, Arc<dyn GitProviderFactory>>,
    fallback: Option<Arc<contents::ContentsApiFactory>>,
}

impl GitProviderRegistry {
    /// Empty registry without fallback
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with github.com, the configured extra hosts and the enterprise fallback
    #[must_use]
    pub fn with_defaults(extra_hosts: &HashMap<String, String>, timeout: Duration) -> Self {
        let http = contents::HttpClient::new(timeout);
        let mut registry = Self {
            providers: HashMap::new(),
            fallback: Some(Arc::new(contents::ContentsApiFactory::enterprise(
                http.clone(),
            ))),
        };
        registry.register(
            GITHUB_HOST,
            Arc::new(contents::ContentsApiFactory::new(
                http.clone(),
                GITHUB_API_BASE,
            )),
        );
        for (host, api_base) in extra_hosts {
            registry.register(
                host,
                Arc::new(contents::ContentsApiFactory::new(http.clone(), api_base)),
            );
        }
        registry
    }

    pub fn register(&mut self, host: &str, factory: Arc<dyn GitProviderFactory>) {
        self.providers.insert(host.to_lowercase(), factory);
    }

    /// Provider for `repo_url`, authenticated with `token` when given
    pub fn provider_for(
        &self,
        repo_url: &str,
        token: Option<Zeroizing<String>>,
    ) -> Result<Arc<dyn GitProvider>, GitError> {
        let repo = RepoLocation::parse(repo_url)?;
        if let Some(factory) = self.providers.get(&repo.host) {
            return factory.build(&repo, token);
        }
        match &self.fallback {
            Some(factory) => factory.build(&repo, token),
            None => Err(GitError::UnknownHost(repo.host)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_github_url() {
        let repo = RepoLocation::parse("https://github.com/argoproj/argocd-example-apps.git").unwrap();
        assert_eq!(repo.host, "github.com");
        assert_eq!(repo.full_name, "argoproj/argocd-example-apps");
        assert_eq!(repo.canonical(), "github.com/argoproj/argocd-example-apps");
    }

    #[test]
    fn test_parse_url_with_port_and_trailing_slash() {
        let repo = RepoLocation::parse("https://Git.Example.com:8443/team/app/").unwrap();
        assert_eq!(repo.host, "git.example.com:8443");
        assert_eq!(repo.full_name, "team/app");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert!(RepoLocation::parse("not a url").is_err());
        assert!(RepoLocation::parse("https://github.com/only-owner").is_err());
    }

    #[test]
    fn test_registry_without_fallback_rejects_unknown_host() {
        let registry = GitProviderRegistry::new();
        let err = registry
            .provider_for("https://gitlab.local/team/app", None)
            .unwrap_err();
        assert!(matches!(err, GitError::UnknownHost(host) if host == "gitlab.local"));
    }

    #[test]
    fn test_registry_routes_registered_host() {
        let provider = Arc::new(memory::StaticGitProvider::new());
        let mut registry = GitProviderRegistry::new();
        registry.register(
            "git.test",
            Arc::new(memory::StaticProviderFactory::new(provider)),
        );
        assert!(registry
            .provider_for("https://git.test/team/app", None)
            .is_ok());
    }

    #[test]
    fn test_content_entry_deserializes_unknown_type() {
        let entry: ContentEntry = serde_json::from_value(serde_json::json!({
            "name": "link",
            "path": "dir/link",
            "type": "symlink",
            "download_url": null
        }))
        .unwrap();
        assert_eq!(entry.entry_type, EntryType::Other);
        assert!(entry.download_url.is_none());
    }
}
