//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `gitops_sync_reconciliations_total` - Total number of Application reconciliations
//! - `gitops_sync_reconciliation_errors_total` - Total number of reconciliation errors
//! - `gitops_sync_passes_total` - Sync passes by outcome (`success`, `failure`)
//! - `gitops_sync_pass_duration_seconds` - Duration of sync passes
//! - `gitops_sync_objects_applied_total` - Objects applied by action (`create`, `update`)
//! - `gitops_sync_objects_pruned_total` - Live objects deleted by garbage collection
//! - `gitops_sync_drift_detected_total` - Objects found out of sync with git
//! - `gitops_sync_webhook_events_total` - Webhook deliveries by provider and outcome
//! - `gitops_sync_scheduled_tasks` - Current number of periodic sync tasks
//! - `gitops_sync_git_operations_total` - Git provider/CLI calls by operation
//! - `gitops_sync_git_operation_errors_total` - Failed git provider/CLI calls by operation

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_sync_reconciliations_total",
        "Total number of Application reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_sync_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static SYNC_PASSES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("gitops_sync_passes_total", "Total number of sync passes by outcome"),
        &["outcome"],
    )
    .expect("Failed to create SYNC_PASSES_TOTAL metric - this should never happen")
});

static SYNC_PASS_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "gitops_sync_pass_duration_seconds",
            "Duration of sync passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create SYNC_PASS_DURATION metric - this should never happen")
});

static OBJECTS_APPLIED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gitops_sync_objects_applied_total",
            "Total number of objects applied to destination clusters by action",
        ),
        &["action"],
    )
    .expect("Failed to create OBJECTS_APPLIED_TOTAL metric - this should never happen")
});

static OBJECTS_PRUNED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_sync_objects_pruned_total",
        "Total number of live objects deleted because they left git",
    )
    .expect("Failed to create OBJECTS_PRUNED_TOTAL metric - this should never happen")
});

static DRIFT_DETECTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_sync_drift_detected_total",
        "Total number of objects found out of sync with git",
    )
    .expect("Failed to create DRIFT_DETECTED_TOTAL metric - this should never happen")
});

static WEBHOOK_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gitops_sync_webhook_events_total",
            "Total number of webhook deliveries by provider and outcome",
        ),
        &["provider", "outcome"],
    )
    .expect("Failed to create WEBHOOK_EVENTS_TOTAL metric - this should never happen")
});

static SCHEDULED_TASKS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "gitops_sync_scheduled_tasks",
        "Current number of periodic sync tasks",
    )
    .expect("Failed to create SCHEDULED_TASKS metric - this should never happen")
});

static GIT_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gitops_sync_git_operations_total",
            "Total number of git provider and git CLI operations",
        ),
        &["operation"],
    )
    .expect("Failed to create GIT_OPERATIONS_TOTAL metric - this should never happen")
});

static GIT_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gitops_sync_git_operation_errors_total",
            "Total number of failed git provider and git CLI operations",
        ),
        &["operation"],
    )
    .expect("Failed to create GIT_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_PASSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_PASS_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_PRUNED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DRIFT_DETECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WEBHOOK_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SCHEDULED_TASKS.clone()))?;
    REGISTRY.register(Box::new(GIT_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GIT_OPERATION_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn record_sync_pass(success: bool, duration: f64) {
    let outcome = if success { "success" } else { "failure" };
    SYNC_PASSES_TOTAL.with_label_values(&[outcome]).inc();
    SYNC_PASS_DURATION.observe(duration);
}

pub fn increment_objects_applied(action: &str) {
    OBJECTS_APPLIED_TOTAL.with_label_values(&[action]).inc();
}

pub fn increment_objects_pruned(count: usize) {
    OBJECTS_PRUNED_TOTAL.inc_by(count as u64);
}

pub fn increment_drift_detected() {
    DRIFT_DETECTED_TOTAL.inc();
}

pub fn increment_webhook_events(provider: &str, outcome: &str) {
    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&[provider, outcome])
        .inc();
}

#[allow(
    clippy::cast_possible_wrap,
    reason = "Task counts never approach i64::MAX"
)]
pub fn set_scheduled_tasks(count: usize) {
    SCHEDULED_TASKS.set(count as i64);
}

pub fn increment_git_operations(operation: &str) {
    GIT_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_git_operation_errors(operation: &str) {
    GIT_OPERATION_ERRORS_TOTAL
        .with_label_values(&[operation])
        .inc();
}
