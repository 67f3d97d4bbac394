//! # Reconcile
//!
//! Handles one watch event for an Application:
//!
//! 1. Deleted: clear its objects and drop the finalizer ([`super::finalize`])
//! 2. Otherwise: ensure the finalizer, fill in defaults, the webhook secret and
//!    conditions, persist status when it changed
//! 3. (Re)start its periodic sync task at the current period
//! 4. Run a first pass right away when the Application is new
//!
//! Errors are handled by the error policy in [`crate::runtime::error_policy`].

use super::finalize::{add_finalizer, cleanup, has_finalizer};
use super::types::{Reconciler, ReconcilerError};
use crate::cluster::{ClusterError, ObjectRef};
use crate::constants::WEBHOOK_SECRET_LENGTH;
use crate::crd::{
    set_condition, Application, ApplicationStatus, Condition, CONDITION_READY,
    CONDITION_WEBHOOK_REGISTERED, REASON_MANUAL_REGISTRATION, REASON_NO_GIT_TOKEN,
};
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// Reconcile entry point driven by the kube-runtime controller
pub async fn reconcile(
    app: Arc<Application>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let key = app.app_key();
    let span = info_span!(
        "controller.reconcile",
        app = %key,
        resource.version = %app.resource_version().unwrap_or_default()
    );

    async move {
        metrics::increment_reconciliations();
        let start = Instant::now();

        let result = if app.metadata.deletion_timestamp.is_some() {
            cleanup(&app, &ctx).await
        } else {
            apply(&app, &ctx).await
        };

        if result.is_ok() {
            let resource_key = format!("{}/{}", key.namespace, key.name);
            if ctx.reset_backoff(&resource_key) {
                info!("controller.backoff.reset");
            }
            debug!(duration_secs = start.elapsed().as_secs_f64(), "controller.reconcile.done");
        }
        result
    }
    .instrument(span)
    .await
}

async fn apply(app: &Application, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let mut app = if has_finalizer(app) {
        app.clone()
    } else {
        add_finalizer(app, ctx.store.as_ref()).await?
    };

    let initialized = app.apply_defaults(ctx.config.default_sync_check_period());
    let secret_generated = ensure_webhook_secret(&mut app);
    let conditions_changed = update_conditions(&mut app);

    if initialized || secret_generated || conditions_changed {
        write_status(&app, ctx).await?;
    }

    ctx.scheduler.schedule_app(&app);

    if initialized {
        info!(period_secs = app.sync_check_period().as_secs(), "controller.initial_sync");
        // Failures are retried by the periodic task
        if let Err(e) = ctx.engine.sync_and_record(&mut app, false).await {
            error!(error = %e, "controller.initial_sync.failed");
        }
    }

    Ok(Action::await_change())
}

/// Generate the webhook secret on first sight. Returns whether it was created.
fn ensure_webhook_secret(app: &mut Application) -> bool {
    if app.webhook_secret().is_some() {
        return false;
    }
    let status = app.status.get_or_insert_with(ApplicationStatus::default);
    status.secrets = Some(random_secret(WEBHOOK_SECRET_LENGTH));
    true
}

fn random_secret(len: usize) -> String {
    let mut secret = String::with_capacity(len);
    while secret.len() < len {
        secret.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    secret.truncate(len);
    secret
}

/// Maintain the `webhook-registered` and `ready` conditions.
///
/// Webhooks are not registered with the git host by the controller: without a
/// token the condition says so, with one it asks for manual registration.
fn update_conditions(app: &mut Application) -> bool {
    let webhook = if app.spec.source.token.is_none() {
        Condition::new(
            CONDITION_WEBHOOK_REGISTERED,
            false,
            Some(REASON_NO_GIT_TOKEN),
            Some("Skipped to register webhook"),
        )
    } else {
        Condition::new(
            CONDITION_WEBHOOK_REGISTERED,
            false,
            Some(REASON_MANUAL_REGISTRATION),
            Some("Register the URL and secret from the webhookurl endpoint on the git host"),
        )
    };
    let ready = Condition::new(CONDITION_READY, app.webhook_secret().is_some(), None, None);

    let status = app.status.get_or_insert_with(ApplicationStatus::default);
    let webhook_changed = set_condition(&mut status.conditions, webhook);
    let ready_changed = set_condition(&mut status.conditions, ready);
    webhook_changed || ready_changed
}

async fn write_status(app: &Application, ctx: &Reconciler) -> Result<(), ReconcilerError> {
    let Some(status) = app.status.as_ref() else {
        return Ok(());
    };
    let status_error = |source: ClusterError| ReconcilerError::Status {
        app: app.app_key().to_string(),
        source,
    };
    let status = serde_json::to_value(status)
        .map_err(|e| status_error(ClusterError::Invalid(e.to_string())))?;
    let target = ObjectRef::of::<Application>(app.namespace().unwrap_or_default(), app.name_any());
    ctx.store
        .patch_status(&target, &status)
        .await
        .map_err(status_error)?;
    debug!("controller.status.written");
    Ok(())
}
