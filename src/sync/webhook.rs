//! # Webhook Dispatch
//!
//! Routes parsed webhook events to plugins by [`EventType`]. The built-in
//! [`PushSyncPlugin`] runs a forced pass when a push hits the Application's
//! source repository. Further plugins register with
//! [`WebhookDispatcher::add_plugin`] without touching the dispatcher.

use super::engine::SyncEngine;
use super::error::SyncError;
use crate::crd::Application;
use crate::git::webhook::{EventType, WebhookEvent};
use crate::git::RepoLocation;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("push event carries no push payload")]
    MissingPush,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[async_trait]
pub trait WebhookPlugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn handle(&self, app: &Application, event: &WebhookEvent) -> Result<(), WebhookError>;
}

#[derive(Debug, Default)]
pub struct WebhookDispatcher {
    plugins: HashMap<EventType, Vec<Arc<dyn WebhookPlugin>>>,
}

impl WebhookDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with the push-triggered sync registered
    #[must_use]
    pub fn with_push_sync(engine: Arc<SyncEngine>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.add_plugin(&[EventType::Push], Arc::new(PushSyncPlugin::new(engine)));
        dispatcher
    }

    pub fn add_plugin(&mut self, events: &[EventType], plugin: Arc<dyn WebhookPlugin>) {
        for event in events {
            self.plugins
                .entry(*event)
                .or_default()
                .push(Arc::clone(&plugin));
        }
    }

    /// Run every plugin registered for the event's type.
    ///
    /// All plugins run even when one fails; the last error is returned.
    pub async fn dispatch(
        &self,
        app: &Application,
        event: &WebhookEvent,
    ) -> Result<usize, WebhookError> {
        let Some(plugins) = self.plugins.get(&event.event_type) else {
            debug!(app = %app.app_key(), event = ?event.event_type, "webhook.no_plugins");
            return Ok(0);
        };

        let mut last_error = None;
        for plugin in plugins {
            if let Err(e) = plugin.handle(app, event).await {
                error!(app = %app.app_key(), plugin = plugin.name(), error = %e, "webhook.plugin.failed");
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(plugins.len()),
        }
    }
}

/// Forced sync on pushes to the Application's repository
#[derive(Debug)]
pub struct PushSyncPlugin {
    engine: Arc<SyncEngine>,
}

impl PushSyncPlugin {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

/// Whether `event` came from the repository `app` reads from
#[must_use]
pub fn matches_source(app: &Application, event: &WebhookEvent) -> bool {
    let Some(repository) = event.repository.as_deref() else {
        return false;
    };
    RepoLocation::parse(&app.spec.source.repo_url)
        .map(|source| source.canonical() == repository)
        .unwrap_or(false)
}

#[async_trait]
impl WebhookPlugin for PushSyncPlugin {
    fn name(&self) -> &'static str {
        "push-sync"
    }

    async fn handle(&self, app: &Application, event: &WebhookEvent) -> Result<(), WebhookError> {
        let push = event.push.as_ref().ok_or(WebhookError::MissingPush)?;
        if !matches_source(app, event) {
            debug!(
                app = %app.app_key(),
                repository = ?event.repository,
                "webhook.push.other_repository"
            );
            return Ok(());
        }

        info!(app = %app.app_key(), git_ref = %push.git_ref, commit = %push.after, "webhook.push.sync");
        self.engine.sync_named(&app.app_key(), true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ApplicationSpec, Destination, Source, SourceType, SyncPolicy};
    use crate::git::webhook::{PushEvent, WebhookProvider};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recording {
        calls: Mutex<Vec<&'static str>>,
        fail: bool,
        name: &'static str,
    }

    #[async_trait]
    impl WebhookPlugin for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, _app: &Application, _event: &WebhookEvent) -> Result<(), WebhookError> {
            self.calls.lock().unwrap().push(self.name);
            if self.fail {
                Err(WebhookError::MissingPush)
            } else {
                Ok(())
            }
        }
    }

    fn app(repo_url: &str) -> Application {
        let mut app = Application::new(
            "web",
            ApplicationSpec {
                source: Source {
                    repo_url: repo_url.to_string(),
                    path: String::new(),
                    target_revision: "main".to_string(),
                    source_type: SourceType::PlainYaml,
                    token: None,
                },
                destination: Destination::default(),
                sync_policy: SyncPolicy::default(),
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app
    }

    fn event(event_type: EventType, repository: &str) -> WebhookEvent {
        WebhookEvent {
            provider: WebhookProvider::GitHub,
            event_type,
            repository: Some(repository.to_string()),
            push: Some(PushEvent {
                git_ref: "refs/heads/main".to_string(),
                after: "abc".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_routes_by_event_type() {
        let push = Arc::new(Recording {
            name: "push",
            ..Default::default()
        });
        let pr = Arc::new(Recording {
            name: "pr",
            ..Default::default()
        });
        let mut dispatcher = WebhookDispatcher::new();
        dispatcher.add_plugin(&[EventType::Push], push.clone());
        dispatcher.add_plugin(&[EventType::PullRequest], pr.clone());

        let app = app("https://github.com/owner/repo");
        let ran = dispatcher
            .dispatch(&app, &event(EventType::Push, "github.com/owner/repo"))
            .await
            .unwrap();
        assert_eq!(ran, 1);
        assert_eq!(push.calls.lock().unwrap().len(), 1);
        assert!(pr.calls.lock().unwrap().is_empty());

        let ran = dispatcher
            .dispatch(&app, &event(EventType::Other, "github.com/owner/repo"))
            .await
            .unwrap();
        assert_eq!(ran, 0);
    }

    #[tokio::test]
    async fn test_all_plugins_run_and_error_is_returned() {
        let failing = Arc::new(Recording {
            name: "failing",
            fail: true,
            ..Default::default()
        });
        let fine = Arc::new(Recording {
            name: "fine",
            ..Default::default()
        });
        let mut dispatcher = WebhookDispatcher::new();
        dispatcher.add_plugin(&[EventType::Push], failing.clone());
        dispatcher.add_plugin(&[EventType::Push], fine.clone());

        let result = dispatcher
            .dispatch(
                &app("https://github.com/owner/repo"),
                &event(EventType::Push, "github.com/owner/repo"),
            )
            .await;
        assert!(matches!(result, Err(WebhookError::MissingPush)));
        assert_eq!(fine.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_matches_source_repository() {
        let app = app("https://GitHub.com/Owner/Repo.git");
        assert!(matches_source(&app, &event(EventType::Push, "github.com/owner/repo")));
        assert!(!matches_source(&app, &event(EventType::Push, "github.com/owner/other")));

        let mut anonymous = event(EventType::Push, "");
        anonymous.repository = None;
        assert!(!matches_source(&app, &anonymous));
    }
}
