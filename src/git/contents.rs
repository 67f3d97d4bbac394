//! GitHub-compatible contents REST API provider.
//!
//! Lists paths with `GET {api_base}/repos/{owner}/{repo}/contents/{path}?ref={revision}`
//! and downloads files from the `download_url` each entry carries. GitHub
//! Enterprise and Gitea expose the same shape.

use super::{ContentEntry, GitError, GitProvider, GitProviderFactory, RepoLocation};
use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// HTTP client shared by every contents provider
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gitops-sync-controller/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, timeout }
    }
}

/// Factory for [`ContentsApiProvider`]s
#[derive(Debug, Clone)]
pub struct ContentsApiFactory {
    http: HttpClient,
    /// `None` derives `https://<host>/api/v3` from the repository host
    api_base: Option<String>,
}

impl ContentsApiFactory {
    pub fn new(http: HttpClient, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: Some(api_base.into().trim_end_matches('/').to_string()),
        }
    }

    #[must_use]
    pub fn enterprise(http: HttpClient) -> Self {
        Self {
            http,
            api_base: None,
        }
    }
}

impl GitProviderFactory for ContentsApiFactory {
    fn build(
        &self,
        repo: &RepoLocation,
        token: Option<Zeroizing<String>>,
    ) -> Result<Arc<dyn GitProvider>, GitError> {
        let api_base = self
            .api_base
            .clone()
            .unwrap_or_else(|| format!("https://{}/api/v3", repo.host));
        Ok(Arc::new(ContentsApiProvider {
            http: self.http.clone(),
            api_base,
            full_name: repo.full_name.clone(),
            token,
        }))
    }
}

/// Provider for one repository over the contents API
pub struct ContentsApiProvider {
    http: HttpClient,
    api_base: String,
    full_name: String,
    token: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ContentsApiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentsApiProvider")
            .field("api_base", &self.api_base)
            .field("full_name", &self.full_name)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

/// A directory path returns an array, a file path a single object
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Many(Vec<ContentEntry>),
    One(ContentEntry),
}

impl ContentsApiProvider {
    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.client.get(url);
        match self.token.as_deref() {
            Some(token) if !token.is_empty() => {
                let value = if token.contains(' ') {
                    token.clone()
                } else {
                    format!("token {token}")
                };
                builder.header(AUTHORIZATION, value)
            }
            _ => builder,
        }
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
        url: &str,
        path: &str,
    ) -> Result<reqwest::Response, GitError> {
        metrics::increment_git_operations(operation);
        let response = request.send().await.map_err(|source| {
            metrics::increment_git_operation_errors(operation);
            if source.is_timeout() {
                GitError::Timeout {
                    operation: format!("{operation} {url}"),
                    timeout: self.http.timeout,
                }
            } else {
                GitError::Http {
                    url: url.to_string(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            metrics::increment_git_operation_errors(operation);
            return Err(GitError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            metrics::increment_git_operation_errors(operation);
            return Err(GitError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GitProvider for ContentsApiProvider {
    async fn list_contents(
        &self,
        path: &str,
        revision: &str,
    ) -> Result<Vec<ContentEntry>, GitError> {
        let path = path.trim_matches('/');
        let url = format!(
            "{}/repos/{}/contents/{}",
            self.api_base, self.full_name, path
        );
        debug!(url = %url, revision = %revision, "git.contents.list");

        let request = self
            .request(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .query(&[("ref", revision)]);
        let response = self.send("list_contents", request, &url, path).await?;
        let listing: Listing = response.json().await.map_err(|e| GitError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;

        Ok(match listing {
            Listing::Many(entries) => entries,
            Listing::One(entry) => vec![entry],
        })
    }

    async fn get_raw(&self, url: &str) -> Result<Vec<u8>, GitError> {
        debug!(url = %url, "git.contents.get_raw");
        let response = self.send("get_raw", self.request(url), url, url).await?;
        let bytes = response.bytes().await.map_err(|e| GitError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}
