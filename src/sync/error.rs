//! Sync pass error taxonomy.

use crate::cluster::ClusterError;
use crate::git::GitError;
use thiserror::Error;

/// Turning an Application's source into desired objects failed
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source type {0} is not supported")]
    UnsupportedType(String),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("git token secret {secret} key {key}: {message}")]
    TokenSecret {
        secret: String,
        key: String,
        message: String,
    },
    #[error("cannot parse manifest {origin}: {message}")]
    Parse { origin: String, message: String },
    #[error("helm template of {chart} failed: {message}")]
    Render { chart: String, message: String },
    #[error("repository cache: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// The source path does not exist at the target revision
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::Git(e) if e.is_not_found())
    }
}

/// Building the store for an Application's destination failed
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("unable to find cluster secret {secret}: {source}")]
    SecretNotFound {
        secret: String,
        #[source]
        source: ClusterError,
    },
    #[error("cluster secret {secret} has no {key} entry")]
    MissingKubeconfig { secret: String, key: &'static str },
    #[error("cluster secret {secret} holds an invalid kubeconfig: {message}")]
    InvalidKubeconfig { secret: String, message: String },
    #[error("cannot connect to cluster {cluster}: {source}")]
    Connect {
        cluster: String,
        #[source]
        source: ClusterError,
    },
}

/// A failed pass. `app` is the Application key `name/namespace`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{app}: loading Application failed: {source}")]
    Load {
        app: String,
        #[source]
        source: ClusterError,
    },
    #[error("{app}: resolving source failed: {source}")]
    SourceResolution {
        app: String,
        #[source]
        source: SourceError,
    },
    #[error("{app}: resolving target cluster failed: {source}")]
    TargetResolution {
        app: String,
        #[source]
        source: TargetError,
    },
    #[error("{app}: comparing {object} failed: {source}")]
    DriftComparison {
        app: String,
        object: String,
        #[source]
        source: ClusterError,
    },
    #[error("{app}: applying {object} failed: {source}")]
    Apply {
        app: String,
        object: String,
        #[source]
        source: ClusterError,
    },
    #[error("{app}: tracking {object} failed: {source}")]
    Tracking {
        app: String,
        object: String,
        #[source]
        source: ClusterError,
    },
    #[error("{app}: deleting orphan {object} failed: {source}")]
    Gc {
        app: String,
        object: String,
        #[source]
        source: ClusterError,
    },
    #[error("{app}: writing status failed: {source}")]
    Status {
        app: String,
        #[source]
        source: ClusterError,
    },
}

impl SyncError {
    /// Application key the failed pass belonged to
    #[must_use]
    pub fn app(&self) -> &str {
        match self {
            SyncError::Load { app, .. }
            | SyncError::SourceResolution { app, .. }
            | SyncError::TargetResolution { app, .. }
            | SyncError::DriftComparison { app, .. }
            | SyncError::Apply { app, .. }
            | SyncError::Tracking { app, .. }
            | SyncError::Gc { app, .. }
            | SyncError::Status { app, .. } => app,
        }
    }

    /// The Application itself no longer exists
    #[must_use]
    pub fn is_app_missing(&self) -> bool {
        matches!(self, SyncError::Load { source, .. } if source.is_not_found())
    }
}
