//! # HTTP Server
//!
//! Endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe (returns 200 when controller is ready)
//! - `POST /webhook/{namespace}/{name}` - git host deliveries for one Application
//! - `PUT /api/v1/namespaces/{namespace}/applications/{name}/sync` - forced sync
//! - `GET /api/v1/namespaces/{namespace}/applications/{name}/webhookurl` - URL and
//!   secret to register on the git host
//!
//! The server runs on port 24335 by default (configurable via `SERVER_PORT`).

use crate::cluster::get_typed;
use crate::crd::{AppKey, Application};
use crate::git::webhook::{parse_webhook, WebhookParseError};
use crate::observability::metrics::{self, REGISTRY};
use crate::sync::{SyncEngine, WebhookDispatcher};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
    pub engine: Arc<SyncEngine>,
    pub dispatcher: Arc<WebhookDispatcher>,
    /// Host part of advertised webhook URLs
    pub webhook_host: String,
}

/// What a user registers on the git host
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookUrl {
    pub url: String,
    pub secret: String,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/webhook/{namespace}/{name}", post(webhook_handler))
        .route(
            "/api/v1/namespaces/{namespace}/applications/{name}/sync",
            put(sync_handler),
        )
        .route(
            "/api/v1/namespaces/{namespace}/applications/{name}/webhookurl",
            get(webhook_url_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process exits.
///
/// The controller is marked ready once the listener is bound.
pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "server.listening");
    state.is_ready.store(true, Ordering::Relaxed);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "server.metrics.encode_failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Accept a delivery and hand it to the dispatcher in the background.
///
/// The git host only learns whether the delivery was authentic and readable;
/// plugin failures are logged.
async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let app: Application = match get_typed(state.engine.store().as_ref(), &namespace, &name).await
    {
        Ok(app) => app,
        Err(e) => {
            warn!(app = %AppKey::new(name.as_str(), namespace.as_str()), error = %e, "webhook.unknown_application");
            metrics::increment_webhook_events("unknown", "unknown_application");
            return (
                StatusCode::BAD_REQUEST,
                format!("cannot get Application {namespace}/{name}"),
            )
                .into_response();
        }
    };

    let event = match parse_webhook(&headers, &body, app.webhook_secret()) {
        Ok(Some(event)) => event,
        Ok(None) => {
            metrics::increment_webhook_events("unknown", "ignored");
            return (StatusCode::OK, "ignored").into_response();
        }
        Err(e @ WebhookParseError::Signature(_)) => {
            warn!(app = %app.app_key(), error = %e, "webhook.rejected");
            metrics::increment_webhook_events("unknown", "rejected");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
        Err(e @ WebhookParseError::Decode { provider, .. }) => {
            warn!(app = %app.app_key(), error = %e, "webhook.malformed");
            metrics::increment_webhook_events(provider.as_str(), "malformed");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    metrics::increment_webhook_events(event.provider.as_str(), "accepted");
    let span = info_span!("webhook.dispatch", app = %app.app_key(), event = ?event.event_type);
    let dispatcher = Arc::clone(&state.dispatcher);
    tokio::spawn(
        async move {
            match dispatcher.dispatch(&app, &event).await {
                Ok(plugins) => info!(plugins, "webhook.dispatched"),
                Err(e) => error!(error = %e, "webhook.dispatch.failed"),
            }
        }
        .instrument(span),
    );

    (StatusCode::ACCEPTED, "accepted").into_response()
}

async fn sync_handler(
    State(state): State<Arc<ServerState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let key = AppKey::new(name, namespace);
    match state.engine.sync_named(&key, true).await {
        Ok(report) => {
            info!(app = %key, status = ?report.status, "server.sync.done");
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) if e.is_app_missing() => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        Err(e) => {
            error!(app = %key, error = %e, "server.sync.failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn webhook_url_handler(
    State(state): State<Arc<ServerState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match get_typed::<Application>(state.engine.store().as_ref(), &namespace, &name).await {
        Ok(app) => Json(WebhookUrl {
            url: app.webhook_url(&state.webhook_host),
            secret: app.webhook_secret().unwrap_or_default().to_string(),
        })
        .into_response(),
        Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        Err(e) => {
            error!(app = %AppKey::new(name.as_str(), namespace.as_str()), error = %e, "server.webhook_url.failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("cannot get Application {namespace}/{name}"),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{to_dynamic, ClusterStore, InMemoryClusterStore, InMemoryConnector};
    use crate::crd::{ApplicationSpec, ApplicationStatus, Destination, Source, SourceType, SyncPolicy};
    use crate::git::cli::GitCli;
    use crate::git::memory::{StaticGitProvider, StaticProviderFactory};
    use crate::git::webhook::github_signature;
    use crate::git::GitProviderRegistry;
    use crate::sync::manifest::{HelmSyncer, PlainYamlSyncer};
    use crate::sync::{ManifestResolver, TargetResolver};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const CONFIG_MAP: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  mode: blue\n";
    const SECRET: &str = "0123456789abcdef0123";
    const PUSH_BODY: &str = r#"{
        "ref": "refs/heads/main",
        "after": "0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c",
        "repository": {"html_url": "https://git.test/team/apps"}
    }"#;

    struct Fixture {
        store: Arc<InMemoryClusterStore>,
        state: Arc<ServerState>,
        _cache: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let store = InMemoryClusterStore::shared();
        let files = Arc::new(StaticGitProvider::new());
        files.insert_file("web/cm.yaml", CONFIG_MAP);
        let mut registry = GitProviderRegistry::new();
        registry.register("git.test", Arc::new(StaticProviderFactory::new(files)));
        let cache = tempfile::tempdir().unwrap();
        let timeout = Duration::from_secs(5);
        let manifests = ManifestResolver::new(
            PlainYamlSyncer::new(Arc::new(registry)),
            HelmSyncer::new(GitCli::new("git", timeout), "helm", cache.path(), timeout),
        );
        let targets = TargetResolver::new(
            Arc::clone(&store) as Arc<dyn ClusterStore>,
            Arc::new(InMemoryConnector::new()),
        );
        let engine = Arc::new(SyncEngine::new(targets, manifests, true));
        let dispatcher = Arc::new(WebhookDispatcher::with_push_sync(Arc::clone(&engine)));
        let state = Arc::new(ServerState {
            is_ready: Arc::new(AtomicBool::new(false)),
            engine,
            dispatcher,
            webhook_host: "cd.example.com".to_string(),
        });
        Fixture {
            store,
            state,
            _cache: cache,
        }
    }

    async fn create_app(store: &InMemoryClusterStore) {
        let mut app = Application::new(
            "web",
            ApplicationSpec {
                source: Source {
                    repo_url: "https://git.test/team/apps".to_string(),
                    path: "web".to_string(),
                    target_revision: "main".to_string(),
                    source_type: SourceType::PlainYaml,
                    token: None,
                },
                destination: Destination {
                    name: String::new(),
                    namespace: "apps".to_string(),
                },
                sync_policy: SyncPolicy {
                    auto_sync: false,
                    sync_check_period: 60,
                },
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app.status = Some(ApplicationStatus {
            secrets: Some(SECRET.to_string()),
            ..ApplicationStatus::default()
        });
        store.create(&to_dynamic(&app).unwrap()).await.unwrap();
    }

    fn push_request(uri: &str, signature: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-github-event", "push")
            .header("x-hub-signature-256", signature)
            .body(Body::from(PUSH_BODY))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_probes() {
        let fx = fixture();
        let get = |uri: &'static str| Request::builder().uri(uri).body(Body::empty()).unwrap();

        let response = router(Arc::clone(&fx.state)).oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(Arc::clone(&fx.state)).oneshot(get("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        fx.state.is_ready.store(true, Ordering::Relaxed);
        let response = router(Arc::clone(&fx.state)).oneshot(get("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(Arc::clone(&fx.state)).oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_for_unknown_application() {
        let fx = fixture();
        let signature = github_signature(SECRET, PUSH_BODY.as_bytes()).unwrap();
        let response = router(Arc::clone(&fx.state))
            .oneshot(push_request("/webhook/default/missing", &signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_bad_signature_is_unauthorized() {
        let fx = fixture();
        create_app(&fx.store).await;
        let signature = github_signature("wrong", PUSH_BODY.as_bytes()).unwrap();
        let response = router(Arc::clone(&fx.state))
            .oneshot(push_request("/webhook/default/web", &signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(fx.store.objects_of_kind("ConfigMap").is_empty());
    }

    #[tokio::test]
    async fn test_webhook_from_unknown_sender_is_ignored() {
        let fx = fixture();
        create_app(&fx.store).await;
        let request = Request::builder()
            .method("POST")
            .uri("/webhook/default/web")
            .body(Body::from("{}"))
            .unwrap();
        let response = router(Arc::clone(&fx.state)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ignored");
    }

    #[tokio::test]
    async fn test_webhook_push_triggers_forced_sync() {
        let fx = fixture();
        create_app(&fx.store).await;
        let signature = github_signature(SECRET, PUSH_BODY.as_bytes()).unwrap();
        let response = router(Arc::clone(&fx.state))
            .oneshot(push_request("/webhook/default/web", &signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // auto_sync is off, so only the forced push sync creates the object
        for _ in 0..100 {
            if !fx.store.objects_of_kind("ConfigMap").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(fx.store.objects_of_kind("ConfigMap").len(), 1);
    }

    #[tokio::test]
    async fn test_manual_sync_route() {
        let fx = fixture();
        create_app(&fx.store).await;
        let request = Request::builder()
            .method("PUT")
            .uri("/api/v1/namespaces/default/applications/web/sync")
            .body(Body::empty())
            .unwrap();
        let response = router(Arc::clone(&fx.state)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(report["created"], 1);
        assert_eq!(report["status"], "Synced");
        assert_eq!(fx.store.objects_of_kind("ConfigMap").len(), 1);
    }

    #[tokio::test]
    async fn test_manual_sync_of_missing_application() {
        let fx = fixture();
        let request = Request::builder()
            .method("PUT")
            .uri("/api/v1/namespaces/default/applications/missing/sync")
            .body(Body::empty())
            .unwrap();
        let response = router(Arc::clone(&fx.state)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_url_route() {
        let fx = fixture();
        create_app(&fx.store).await;
        let get = |uri: &'static str| Request::builder().uri(uri).body(Body::empty()).unwrap();

        let response = router(Arc::clone(&fx.state))
            .oneshot(get("/api/v1/namespaces/default/applications/web/webhookurl"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["url"], "http://cd.example.com/webhook/default/web");
        assert_eq!(body["secret"], SECRET);

        let response = router(Arc::clone(&fx.state))
            .oneshot(get("/api/v1/namespaces/default/applications/missing/webhookurl"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
