//! In-memory [`GitProvider`] serving a fixed file tree.
//!
//! Files can be added and removed between passes to simulate commits.
//! Download URLs take the form `mem://<path>`.

use super::{ContentEntry, EntryType, GitError, GitProvider, GitProviderFactory, RepoLocation};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use zeroize::Zeroizing;

const URL_PREFIX: &str = "mem://";

#[derive(Debug, Default)]
pub struct StaticGitProvider {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl StaticGitProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.trim_matches('/').to_string(), content.into());
        }
    }

    pub fn remove_file(&self, path: &str) -> bool {
        self.files
            .write()
            .map(|mut files| files.remove(path.trim_matches('/')).is_some())
            .unwrap_or(false)
    }

    fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.read().map(|f| f.clone()).unwrap_or_default()
    }
}

fn file_entry(path: &str) -> ContentEntry {
    ContentEntry {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        entry_type: EntryType::File,
        download_url: Some(format!("{URL_PREFIX}{path}")),
    }
}

#[async_trait]
impl GitProvider for StaticGitProvider {
    async fn list_contents(
        &self,
        path: &str,
        _revision: &str,
    ) -> Result<Vec<ContentEntry>, GitError> {
        let path = path.trim_matches('/');
        let files = self.snapshot();
        if files.contains_key(path) {
            return Ok(vec![file_entry(path)]);
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for file in files.keys().filter(|f| f.starts_with(&prefix)) {
            let rest = &file[prefix.len()..];
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => entries.push(file_entry(file)),
            }
        }
        if entries.is_empty() && dirs.is_empty() {
            return Err(GitError::NotFound(path.to_string()));
        }
        entries.extend(dirs.into_iter().map(|dir| ContentEntry {
            path: format!("{prefix}{dir}"),
            name: dir,
            entry_type: EntryType::Dir,
            download_url: None,
        }));
        Ok(entries)
    }

    async fn get_raw(&self, url: &str) -> Result<Vec<u8>, GitError> {
        let path = url.strip_prefix(URL_PREFIX).unwrap_or(url);
        self.snapshot()
            .remove(path)
            .ok_or_else(|| GitError::NotFound(path.to_string()))
    }
}

/// Factory returning the same shared provider for every repository
#[derive(Debug, Clone)]
pub struct StaticProviderFactory {
    provider: Arc<StaticGitProvider>,
}

impl StaticProviderFactory {
    #[must_use]
    pub fn new(provider: Arc<StaticGitProvider>) -> Self {
        Self { provider }
    }
}

impl GitProviderFactory for StaticProviderFactory {
    fn build(
        &self,
        _repo: &RepoLocation,
        _token: Option<Zeroizing<String>>,
    ) -> Result<Arc<dyn GitProvider>, GitError> {
        Ok(Arc::clone(&self.provider) as Arc<dyn GitProvider>)
    }
}
