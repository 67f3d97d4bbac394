//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Application;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Requeue a failed reconcile with per-Application Fibonacci backoff
///
/// Backoff state is tracked per `namespace/name` so one failing Application
/// does not slow down the others.
pub fn handle_reconciliation_error(
    app: Arc<Application>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = app.name_any();
    let namespace = app.namespace().unwrap_or_default();
    let span = tracing::error_span!(
        "controller.watch.reconciliation_error",
        resource.name = %name,
        resource.namespace = %namespace,
        error = %error
    );
    let _guard = span.enter();

    metrics::increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let (backoff_secs, error_count) = ctx
        .next_backoff(&resource_key)
        .unwrap_or((ctx.config.backoff_min_secs, 0));

    let next_attempt = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_secs).unwrap_or(i64::MAX));
    error!(
        backoff_secs,
        error_count,
        next_attempt = %next_attempt.to_rfc3339(),
        "controller.reconcile.failed"
    );

    Action::requeue(Duration::from_secs(backoff_secs))
}

/// Broad classes of watch stream failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 404: the CRD is missing or an object vanished mid-watch
    NotFound,
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version expired, routine after restarts
    Expired,
    /// 429: the API server is throttling or reinitializing storage
    Throttled,
    Other,
}

/// Classify a watch error by its debug rendering.
///
/// 404 is checked first: a plain-text 404 body surfaces as a decode error
/// that mentions other status words.
#[must_use]
pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    let not_found =
        error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
    if not_found {
        return WatchErrorKind::NotFound;
    }
    if error.contains("401") || error.contains("Unauthorized") {
        return WatchErrorKind::Unauthorized;
    }
    if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error.contains("429")
        || error.contains("storage is (re)initializing")
        || error.contains("TooManyRequests")
    {
        return WatchErrorKind::Throttled;
    }
    WatchErrorKind::Other
}

/// Handle a watch stream error.
///
/// Returns `Some(())` to keep the event in the stream, `None` to drop it and
/// let the watcher restart.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> Option<()> {
    let span = tracing::warn_span!("controller.watch.error", error = %error_string);
    handle_classified(classify_watch_error(error_string), backoff_ms, max_backoff_ms, restart_delay)
        .instrument(span)
        .await
}

async fn handle_classified(
    kind: WatchErrorKind,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> Option<()> {
    match kind {
        WatchErrorKind::Unauthorized => {
            error!(
                delay_secs = restart_delay.as_secs(),
                "watch.error.unauthorized: check the controller ClusterRole, ClusterRoleBinding and ServiceAccount"
            );
            tokio::time::sleep(restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorKind::Throttled => {
            let current = backoff_ms.load(Ordering::Relaxed);
            warn!(backoff_ms = current, "watch.error.throttled");
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff_ms.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            info!("watch.error.not_found: Application deleted or CRD missing");
            Some(())
        }
        WatchErrorKind::Other => {
            error!("watch.error.stream");
            tokio::time::sleep(restart_delay).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("ObjectNotFound { name: \"web\" }"),
            WatchErrorKind::NotFound
        );
        // A 404 body that also mentions WatchFailed/Unauthorized stays NotFound
        assert_eq!(
            classify_watch_error("WatchFailed(Unauthorized, invalid type: integer `404`)"),
            WatchErrorKind::NotFound
        );
        assert_eq!(
            classify_watch_error("Api(ErrorResponse { code: 401, reason: \"Unauthorized\" })"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123 (456)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorKind::Throttled
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_watch_doubles_backoff_up_to_cap() {
        let backoff = AtomicU64::new(1_000);
        let restart = Duration::from_secs(1);

        assert!(handle_watch_stream_error("429 TooManyRequests", &backoff, 3_000, restart)
            .await
            .is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 2_000);

        handle_watch_stream_error("429 TooManyRequests", &backoff, 3_000, restart).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_keeps_stream_running() {
        let backoff = AtomicU64::new(1_000);
        let kept = handle_watch_stream_error(
            "ObjectNotFound",
            &backoff,
            3_000,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(kept, Some(()));
        assert_eq!(backoff.load(Ordering::Relaxed), 1_000);
    }
}
