//! # Types
//!
//! Core types for the reconciler.

use crate::cluster::{ClusterError, SharedClusterStore};
use crate::config::SharedControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::sync::{SyncEngine, SyncError, SyncScheduler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("{app}: updating finalizers failed: {source}")]
    Finalizer {
        app: String,
        #[source]
        source: ClusterError,
    },
    #[error("{app}: writing status failed: {source}")]
    Status {
        app: String,
        #[source]
        source: ClusterError,
    },
    #[error(transparent)]
    Cleanup(#[from] SyncError),
}

/// Backoff state for a specific Application
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Context shared by every reconcile of an Application
#[derive(Debug)]
pub struct Reconciler {
    /// Store of the controller's own cluster, where Applications live
    pub store: SharedClusterStore,
    pub engine: Arc<SyncEngine>,
    pub scheduler: Arc<SyncScheduler>,
    pub config: SharedControllerConfig,
    /// Per-Application error backoff, keyed by `namespace/name`
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        engine: Arc<SyncEngine>,
        scheduler: Arc<SyncScheduler>,
        config: SharedControllerConfig,
    ) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            engine,
            scheduler,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a failed reconcile and return the delay before the next attempt
    /// together with the number of consecutive failures
    pub fn next_backoff(&self, resource_key: &str) -> Option<(u64, u32)> {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(resource_key.to_string()).or_insert_with(|| {
                    BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
                });
                state.increment_error();
                Some((state.backoff.next_backoff_seconds(), state.error_count))
            }
            Err(e) => {
                warn!(error = %e, "backoff_states lock poisoned");
                None
            }
        }
    }

    /// Forget the failures of an Application after a successful reconcile.
    ///
    /// Returns whether it had been backing off.
    pub fn reset_backoff(&self, resource_key: &str) -> bool {
        match self.backoff_states.lock() {
            Ok(mut states) => states
                .remove(resource_key)
                .is_some_and(|state| state.error_count > 0),
            Err(_e) => false,
        }
    }
}
