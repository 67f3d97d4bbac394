//! # Initialization
//!
//! Controller startup: rustls provider, tracing, metrics, Kubernetes client,
//! the sync engine with its scheduler, and the HTTP server.

use crate::cluster::{KubeClusterStore, KubeConnector, SharedClusterStore};
use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::reconciler::Reconciler;
use crate::crd::Application;
use crate::git::GitProviderRegistry;
use crate::observability;
use crate::server::{start_server, ServerState};
use crate::sync::{
    ManifestResolver, PeriodicSync, SyncEngine, SyncScheduler, TargetResolver, WebhookDispatcher,
};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    /// Applications in every namespace
    pub applications: Api<Application>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub config: SharedControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must precede any TLS use; rustls 0.23 has no implicit provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_e| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let config = Arc::new(ControllerConfig::from_env());
    observability::logging::init_tracing(config.json_logs())?;

    info!("Starting GitOps Sync Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let applications: Api<Application> = Api::all(client.clone());

    let store: SharedClusterStore =
        Arc::new(KubeClusterStore::new(client.clone(), config.api_call_timeout()));
    let registry = Arc::new(GitProviderRegistry::with_defaults(
        &config.git_provider_hosts,
        config.git_call_timeout(),
    ));
    let manifests = ManifestResolver::from_config(&config, registry);
    let targets = TargetResolver::new(
        store,
        Arc::new(KubeConnector::new(config.api_call_timeout())),
    );
    let engine = Arc::new(SyncEngine::new(
        targets,
        manifests,
        config.serialize_sync_passes,
    ));
    let scheduler = Arc::new(SyncScheduler::spawn(
        Arc::clone(&engine) as Arc<dyn PeriodicSync>
    ));
    let dispatcher = Arc::new(WebhookDispatcher::with_push_sync(Arc::clone(&engine)));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&engine),
        scheduler,
        Arc::clone(&config),
    ));

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
        engine,
        dispatcher,
        webhook_host: config.webhook_host(),
    });

    let port = config.server_port;
    let server_handle = tokio::spawn({
        let state = Arc::clone(&server_state);
        async move {
            if let Err(e) = start_server(port, state).await {
                error!(error = %e, "HTTP server error");
            }
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    log_existing_applications(&applications).await;

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        applications,
        reconciler,
        server_state,
        config,
    })
}

/// Wait for the HTTP server to bind
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Check the CRD is queryable and summarize what the first watch will pick up
async fn log_existing_applications(applications: &Api<Application>) {
    match applications.list(&ListParams::default()).await {
        Ok(list) => {
            let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for app in &list.items {
                by_namespace
                    .entry(app.namespace().unwrap_or_default())
                    .or_default()
                    .push(app.name_any());
            }
            info!(
                total = list.items.len(),
                namespaces = by_namespace.len(),
                "controller.startup.applications"
            );
            for (namespace, mut names) in by_namespace {
                names.sort();
                info!(%namespace, applications = %names.join(", "), "controller.startup.namespace");
            }
        }
        Err(e) => {
            error!(error = %e, "Application CRD is not queryable. Is it installed?");
            warn!("Continuing; the watch will retry");
        }
    }
}
