//! # Watch Loop
//!
//! Watches Application resources in every namespace and drives reconciles.
//! The watch is restarted when its stream ends, until a shutdown signal
//! marks the server as not ready.

use crate::config::SharedControllerConfig;
use crate::constants::{DEFAULT_WATCH_BACKOFF_MAX_MS, DEFAULT_WATCH_BACKOFF_START_MS};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::Application;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::{watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run the controller until shutdown.
///
/// Periodic sync tasks are stopped before returning.
pub async fn run_watch_loop(
    applications: Api<Application>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    let backoff_ms = Arc::new(AtomicU64::new(DEFAULT_WATCH_BACKOFF_START_MS));

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("controller.shutdown.requested");
        shutdown_state.is_ready.store(false, Ordering::Relaxed);
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            break;
        }

        let backoff = Arc::clone(&backoff_ms);
        let restart_delay = config.watch_restart_delay();
        info!("controller.watch.started");
        Controller::new(applications.clone(), watcher::Config::default().any_semantic())
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |event| {
                let backoff = Arc::clone(&backoff);
                async move {
                    match &event {
                        Ok((obj, _action)) => {
                            backoff.store(DEFAULT_WATCH_BACKOFF_START_MS, Ordering::Relaxed);
                            debug!(app = %obj, "watch.event.reconciled");
                            Some(event)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                DEFAULT_WATCH_BACKOFF_MAX_MS,
                                restart_delay,
                            )
                            .await
                            .map(|()| event)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(tracing::info_span!("controller.watch"))
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            break;
        }
        warn!(
            delay_secs = restart_delay.as_secs(),
            "controller.watch.ended, restarting"
        );
        tokio::time::sleep(restart_delay).await;
    }

    info!("controller.watch.stopping");
    reconciler.scheduler.shutdown().await;
    info!("Controller stopped gracefully");
    Ok(())
}

/// Resolve on SIGTERM from the kubelet or SIGINT from a terminal
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "shutdown signal handler failed");
        std::future::pending::<()>().await;
    }
}
