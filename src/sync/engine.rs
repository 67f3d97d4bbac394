//! # Sync Engine
//!
//! One reconciliation pass for one Application:
//!
//! 1. Resolve the target cluster
//! 2. Resolve the desired objects
//! 3. Snapshot the Application's DeployResource records
//! 4. For every desired object: track it, compare it, apply the correction
//!    when the pass is forced or the Application auto-syncs
//! 5. Garbage-collect records (and live objects) no longer desired
//! 6. Record the sync status
//!
//! The first error aborts the pass. Work already done is not rolled back;
//! the next pass converges.

use super::apply::{apply, ApplyAction};
use super::drift::{compare, Drift};
use super::error::SyncError;
use super::locks::KeyedLocks;
use super::manifest::ManifestResolver;
use super::target::TargetResolver;
use super::tracker::DeployResourceTracker;
use crate::cluster::{get_typed, ObjectRef, SharedClusterStore};
use crate::crd::{AppKey, Application, ApplicationStatus, SyncStatus, SyncStatusCode};
use crate::observability::metrics;
use async_trait::async_trait;
use kube::ResourceExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};

/// What one pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub in_sync: usize,
    /// Objects that differed from (or were missing in) the cluster
    pub drifted: usize,
    /// Drifted objects left alone because the pass could not apply them
    pub unresolved: usize,
    pub pruned: usize,
    pub status: SyncStatusCode,
    /// The Application was deleted or cleared; nothing was compared or applied
    pub skipped: bool,
}

/// Entry point the scheduler drives on every tick
#[async_trait]
pub trait PeriodicSync: Send + Sync {
    async fn sync_periodic(&self, key: &AppKey) -> Result<SyncReport, SyncError>;
}

#[derive(Debug)]
pub struct SyncEngine {
    targets: TargetResolver,
    manifests: ManifestResolver,
    tracker: DeployResourceTracker,
    pass_locks: Option<KeyedLocks>,
    /// Applications whose objects were cleared, by key and `metadata.uid`
    cleared: Mutex<HashMap<AppKey, Option<String>>>,
}

impl SyncEngine {
    /// With `serialize_passes`, passes for the same Application never overlap
    #[must_use]
    pub fn new(targets: TargetResolver, manifests: ManifestResolver, serialize_passes: bool) -> Self {
        let tracker = DeployResourceTracker::new(Arc::clone(targets.default_store()));
        Self {
            targets,
            manifests,
            tracker,
            pass_locks: serialize_passes.then(KeyedLocks::new),
            cleared: Mutex::new(HashMap::new()),
        }
    }

    /// Store of the controller's own cluster
    #[must_use]
    pub fn store(&self) -> &SharedClusterStore {
        self.targets.default_store()
    }

    #[must_use]
    pub fn tracker(&self) -> &DeployResourceTracker {
        &self.tracker
    }

    /// Run one pass and update `app.status.sync` in memory.
    ///
    /// `forced` applies corrections even when auto-sync is off.
    pub async fn sync(&self, app: &mut Application, forced: bool) -> Result<SyncReport, SyncError> {
        let key = app.app_key();
        let lock = self.pass_locks.as_ref().map(|locks| locks.lock_for(&key));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        // A pass queued behind `clear` must not bring the objects back
        if self.was_cleared(app) {
            debug!(app = %key, "sync.skipped.cleared");
            return Ok(skipped(app));
        }

        let span = info_span!("sync.pass", app = %key, forced);
        let started = Instant::now();
        let result = self.run_pass(app, forced).instrument(span).await;
        metrics::record_sync_pass(result.is_ok(), started.elapsed().as_secs_f64());

        let report = result?;
        let status = app.status.get_or_insert_with(ApplicationStatus::default);
        status.sync = Some(SyncStatus {
            status: report.status,
            time_check: chrono::Utc::now().timestamp(),
        });
        Ok(report)
    }

    async fn run_pass(&self, app: &Application, forced: bool) -> Result<SyncReport, SyncError> {
        let app_key = app.app_key().to_string();

        let target = self
            .targets
            .resolve(app)
            .await
            .map_err(|source| SyncError::TargetResolution {
                app: app_key.clone(),
                source,
            })?;
        let desired = self
            .manifests
            .resolve(app, self.store().as_ref())
            .await
            .map_err(|source| SyncError::SourceResolution {
                app: app_key.clone(),
                source,
            })?;
        let old = self
            .tracker
            .list(app)
            .await
            .map_err(|source| SyncError::Tracking {
                app: app_key.clone(),
                object: "DeployResource list".to_string(),
                source,
            })?;

        let may_apply = forced || app.spec.sync_policy.auto_sync;
        let mut report = SyncReport::default();
        let mut tracked = HashSet::new();

        for obj in &desired {
            let object = ObjectRef::from_object(obj).map_err(|source| SyncError::Apply {
                app: app_key.clone(),
                object: obj.name_any(),
                source,
            })?;
            let record = self
                .tracker
                .track(app, &object)
                .await
                .map_err(|source| SyncError::Tracking {
                    app: app_key.clone(),
                    object: object.to_string(),
                    source,
                })?;
            tracked.insert(record.name_any());

            let drift = compare(target.as_ref(), obj)
                .await
                .map_err(|source| SyncError::DriftComparison {
                    app: app_key.clone(),
                    object: object.to_string(),
                    source,
                })?;
            let (existed, corrected) = match drift {
                Drift::InSync => {
                    report.in_sync += 1;
                    continue;
                }
                Drift::Missing(obj) => (false, obj),
                Drift::Diverged(obj) => (true, obj),
            };
            report.drifted += 1;
            metrics::increment_drift_detected();

            if !may_apply {
                report.unresolved += 1;
                continue;
            }
            let action = apply(target.as_ref(), existed, &corrected)
                .await
                .map_err(|source| SyncError::Apply {
                    app: app_key.clone(),
                    object: object.to_string(),
                    source,
                })?;
            match action {
                ApplyAction::Created => report.created += 1,
                ApplyAction::Updated => report.updated += 1,
            }
        }

        let pruned = self
            .tracker
            .gc(app, &old, &tracked, target.as_ref())
            .await?;
        report.pruned = pruned.len();
        report.status = if report.unresolved > 0 {
            SyncStatusCode::OutOfSync
        } else {
            SyncStatusCode::Synced
        };

        info!(
            desired = desired.len(),
            created = report.created,
            updated = report.updated,
            in_sync = report.in_sync,
            unresolved = report.unresolved,
            pruned = report.pruned,
            status = %report.status,
            "sync.pass.done"
        );
        Ok(report)
    }

    /// Write `app.status.sync` to the status subresource
    pub async fn record_status(&self, app: &Application) -> Result<(), SyncError> {
        let sync = app.status.as_ref().and_then(|s| s.sync.as_ref());
        let target = ObjectRef::of::<Application>(app.namespace().unwrap_or_default(), app.name_any());
        self.store()
            .patch_status(&target, &serde_json::json!({ "sync": sync }))
            .await
            .map(|_| ())
            .map_err(|source| SyncError::Status {
                app: app.app_key().to_string(),
                source,
            })
    }

    /// Run a pass and persist the resulting status
    pub async fn sync_and_record(
        &self,
        app: &mut Application,
        forced: bool,
    ) -> Result<SyncReport, SyncError> {
        let report = self.sync(app, forced).await?;
        if !report.skipped {
            self.record_status(app).await?;
        }
        Ok(report)
    }

    /// Load the current Application and run a recorded pass on it.
    ///
    /// Applications being deleted are skipped; their objects are about to be cleared.
    pub async fn sync_named(
        &self,
        key: &AppKey,
        forced: bool,
    ) -> Result<SyncReport, SyncError> {
        let mut app: Application = get_typed(self.store().as_ref(), &key.namespace, &key.name)
            .await
            .map_err(|source| SyncError::Load {
                app: key.to_string(),
                source,
            })?;
        if app.metadata.deletion_timestamp.is_some() {
            debug!(app = %key, "sync.skipped.deleting");
            return Ok(skipped(&app));
        }
        self.sync_and_record(&mut app, forced).await
    }

    /// Delete every object the Application owns and drop its local state
    pub async fn clear(&self, app: &Application) -> Result<Vec<ObjectRef>, SyncError> {
        let key = app.app_key();
        // Let a running pass finish before its objects are removed
        let lock = self.pass_locks.as_ref().map(|locks| locks.lock_for(&key));
        let guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        self.cleared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), app.metadata.uid.clone());

        let target = self
            .targets
            .resolve(app)
            .await
            .map_err(|source| SyncError::TargetResolution {
                app: key.to_string(),
                source,
            })?;
        let removed = self.tracker.clear(app, target.as_ref()).await?;
        self.manifests
            .clear(app)
            .await
            .map_err(|source| SyncError::SourceResolution {
                app: key.to_string(),
                source,
            })?;
        drop(guard);
        if let Some(locks) = &self.pass_locks {
            locks.forget(&key);
        }
        info!(app = %key, removed = removed.len(), "sync.clear.done");
        Ok(removed)
    }

    /// Whether this incarnation of the Application has been cleared.
    ///
    /// A recreated Application has a new uid and replaces the marker.
    fn was_cleared(&self, app: &Application) -> bool {
        let key = app.app_key();
        let mut cleared = self.cleared.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(uid) = cleared.get(&key) else {
            return false;
        };
        if *uid == app.metadata.uid {
            return true;
        }
        cleared.remove(&key);
        false
    }
}

fn skipped(app: &Application) -> SyncReport {
    SyncReport {
        status: app.sync_status(),
        skipped: true,
        ..SyncReport::default()
    }
}

#[async_trait]
impl PeriodicSync for SyncEngine {
    async fn sync_periodic(&self, key: &AppKey) -> Result<SyncReport, SyncError> {
        self.sync_named(key, false).await
    }
}
