//! End-to-end sync passes against the in-memory cluster store and a static
//! git tree.

use gitops_sync_controller::cluster::{
    get_typed, to_dynamic, ClusterStore, InMemoryClusterStore, InMemoryConnector, ObjectRef,
};
use gitops_sync_controller::crd::{
    AppKey, Application, ApplicationSpec, Destination, Source, SourceType, SyncPolicy,
    SyncStatusCode,
};
use gitops_sync_controller::git::cli::GitCli;
use gitops_sync_controller::git::memory::{StaticGitProvider, StaticProviderFactory};
use gitops_sync_controller::git::GitProviderRegistry;
use gitops_sync_controller::sync::manifest::{HelmSyncer, PlainYamlSyncer};
use gitops_sync_controller::sync::{
    ManifestResolver, PeriodicSync, SyncEngine, SyncError, SyncScheduler, TargetResolver,
};
use std::sync::Arc;
use std::time::Duration;

const FRONTEND: &str = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: frontend
data:
  color: blue
  replicas: \"3\"
";

const BACKEND: &str = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: backend
data:
  color: green
";

const REDIS: &str = "\
apiVersion: v1
kind: Service
metadata:
  name: redis
spec:
  ports:
  - port: 6379
";

struct Fixture {
    store: Arc<InMemoryClusterStore>,
    files: Arc<StaticGitProvider>,
    engine: Arc<SyncEngine>,
    _cache: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let store = InMemoryClusterStore::shared();
    let files = Arc::new(StaticGitProvider::new());
    files.insert_file("guestbook/frontend.yaml", FRONTEND);
    files.insert_file("guestbook/backend.yaml", BACKEND);
    files.insert_file("guestbook/cache/redis.yaml", REDIS);

    let mut registry = GitProviderRegistry::new();
    registry.register(
        "git.example.com",
        Arc::new(StaticProviderFactory::new(Arc::clone(&files))),
    );
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
    Fixture {
        store,
        files,
        engine: Arc::new(SyncEngine::new(targets, manifests, true)),
        _cache: cache,
    }
}

fn guestbook(auto_sync: bool, destination: &str) -> Application {
    let mut app = Application::new(
        "guestbook",
        ApplicationSpec {
            source: Source {
                repo_url: "https://git.example.com/demo/deployments.git".to_string(),
                path: "guestbook".to_string(),
                target_revision: "main".to_string(),
                source_type: SourceType::PlainYaml,
                token: None,
            },
            destination: Destination {
                name: destination.to_string(),
                namespace: "guestbook".to_string(),
            },
            sync_policy: SyncPolicy {
                auto_sync,
                sync_check_period: 60,
            },
        },
    );
    app.metadata.namespace = Some("default".to_string());
    app
}

fn live_count(store: &InMemoryClusterStore) -> usize {
    store.objects_of_kind("ConfigMap").len() + store.objects_of_kind("Service").len()
}

fn frontend_ref() -> ObjectRef {
    ObjectRef::new("v1", "ConfigMap", "guestbook", "frontend")
}

#[tokio::test]
async fn test_new_application_creates_everything() {
    let fx = fixture();
    let mut app = guestbook(true, "");

    let report = fx.engine.sync(&mut app, false).await.unwrap();

    assert_eq!(report.created, 3);
    assert_eq!(report.status, SyncStatusCode::Synced);
    assert_eq!(app.sync_status(), SyncStatusCode::Synced);
    assert_eq!(live_count(&fx.store), 3);
    assert_eq!(fx.store.objects_of_kind("DeployResource").len(), 3);
    for record in fx.store.objects_of_kind("DeployResource") {
        let labels = record.metadata.labels.unwrap_or_default();
        assert_eq!(
            labels.get("cd.tmax.io/application").map(String::as_str),
            Some("guestbook-default")
        );
    }
}

#[tokio::test]
async fn test_second_forced_pass_applies_nothing() {
    let fx = fixture();
    let mut app = guestbook(true, "");
    fx.engine.sync(&mut app, true).await.unwrap();
    let applies = fx.store.stats().applies();

    let report = fx.engine.sync(&mut app, true).await.unwrap();

    assert_eq!(report.in_sync, 3);
    assert_eq!(report.drifted, 0);
    assert_eq!(fx.store.stats().applies(), applies);
}

#[tokio::test]
async fn test_removed_manifest_is_garbage_collected() {
    let fx = fixture();
    let mut app = guestbook(true, "");
    fx.engine.sync(&mut app, false).await.unwrap();

    assert!(fx.files.remove_file("guestbook/backend.yaml"));
    let report = fx.engine.sync(&mut app, false).await.unwrap();

    assert_eq!(report.pruned, 1);
    assert_eq!(live_count(&fx.store), 2);
    assert_eq!(fx.store.objects_of_kind("DeployResource").len(), 2);
    assert!(fx
        .store
        .get(&ObjectRef::new("v1", "ConfigMap", "guestbook", "backend"))
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_live_only_field_is_not_drift() {
    let fx = fixture();
    let mut app = guestbook(true, "");
    fx.engine.sync(&mut app, false).await.unwrap();

    fx.store
        .modify(&frontend_ref(), |obj| {
            obj.data["data"]["debug"] = serde_json::json!("true");
            obj.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert("edited-by".to_string(), "operator".to_string());
        })
        .unwrap();
    let applies = fx.store.stats().applies();

    let report = fx.engine.sync(&mut app, false).await.unwrap();

    assert_eq!(report.drifted, 0);
    assert_eq!(report.status, SyncStatusCode::Synced);
    assert_eq!(fx.store.stats().applies(), applies);
    let live = fx.store.get(&frontend_ref()).await.unwrap();
    assert_eq!(live.data["data"]["debug"], "true");
}

#[tokio::test]
async fn test_changed_manifest_field_is_applied() {
    let fx = fixture();
    let mut app = guestbook(true, "");
    fx.engine.sync(&mut app, false).await.unwrap();
    fx.store
        .modify(&frontend_ref(), |obj| {
            obj.data["data"]["debug"] = serde_json::json!("true");
        })
        .unwrap();

    fx.files
        .insert_file("guestbook/frontend.yaml", FRONTEND.replace("blue", "red"));
    let report = fx.engine.sync(&mut app, false).await.unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.status, SyncStatusCode::Synced);
    let live = fx.store.get(&frontend_ref()).await.unwrap();
    assert_eq!(live.data["data"]["color"], "red");
    // Fields only present live survive the merge
    assert_eq!(live.data["data"]["debug"], "true");
}

#[tokio::test]
async fn test_manual_policy_reports_drift_until_forced() {
    let fx = fixture();
    let mut app = guestbook(true, "");
    fx.engine.sync(&mut app, false).await.unwrap();

    app.spec.sync_policy.auto_sync = false;
    fx.files
        .insert_file("guestbook/frontend.yaml", FRONTEND.replace("blue", "red"));

    let report = fx.engine.sync(&mut app, false).await.unwrap();
    assert_eq!(report.unresolved, 1);
    assert_eq!(app.sync_status(), SyncStatusCode::OutOfSync);
    let live = fx.store.get(&frontend_ref()).await.unwrap();
    assert_eq!(live.data["data"]["color"], "blue");

    let report = fx.engine.sync(&mut app, true).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(app.sync_status(), SyncStatusCode::Synced);
}

#[tokio::test]
async fn test_missing_kubeconfig_secret_touches_nothing() {
    let fx = fixture();
    let mut app = guestbook(true, "x");

    let err = fx.engine.sync(&mut app, true).await.unwrap_err();

    assert!(matches!(err, SyncError::TargetResolution { .. }));
    assert!(err.to_string().contains("x-kubeconfig"));
    assert_eq!(fx.store.stats().applies(), 0);
    assert_eq!(fx.store.stats().deletes, 0);
    assert!(app.status.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_tick_collects_removed_manifest() {
    let fx = fixture();
    fx.store
        .create(&to_dynamic(&guestbook(true, "")).unwrap())
        .await
        .unwrap();
    let scheduler = SyncScheduler::spawn(Arc::clone(&fx.engine) as Arc<dyn PeriodicSync>);
    scheduler.schedule(AppKey::new("guestbook", "default"), Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(live_count(&fx.store), 3);
    let stored: Application = get_typed(fx.store.as_ref(), "default", "guestbook")
        .await
        .unwrap();
    assert_eq!(stored.sync_status(), SyncStatusCode::Synced);

    fx.files.remove_file("guestbook/cache/redis.yaml");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(live_count(&fx.store), 2);
    assert!(fx.store.objects_of_kind("Service").is_empty());

    scheduler.shutdown().await;
}
