//! # GitOps Sync Controller
//!
//! Continuous-deployment controller for Kubernetes. Each `Application`
//! points at a git repository path holding plain YAML manifests or a Helm
//! chart, and a destination cluster and namespace.
//!
//! 1. **Periodic sync** - every Application gets its own sync task at `syncCheckPeriod`
//! 2. **Drift detection** - live objects are compared to git with a merge patch
//! 3. **Auto-sync** - drift is corrected when `autoSync` is on; otherwise the
//!    Application is reported `OutOfSync`
//! 4. **Garbage collection** - objects removed from git are deleted through their
//!    `DeployResource` ownership records
//! 5. **Webhooks** - GitHub and GitLab pushes trigger a forced sync
//!
//! Multi-cluster destinations read a kubeconfig from the `<name>-kubeconfig`
//! Secret next to the Application.

use anyhow::Result;
use gitops_sync_controller::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(
        init.applications,
        init.reconciler,
        init.server_state,
        init.config,
    )
    .await
}
