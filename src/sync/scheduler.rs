//! # Sync Scheduler
//!
//! One periodic task per Application, owned by a single supervisor task.
//!
//! The reconcile handler, the webhook server and the tasks never share the
//! registry: they send [`Command`]s to the supervisor, which is the only code
//! that touches it. Every periodic task has its own [`CancellationToken`].
//! Re-scheduling an Application cancels its task and starts a new one at the
//! current period; the new task waits for the old one to exit before its first
//! tick, so at most one periodic task per Application is ever running.

use super::engine::PeriodicSync;
use crate::constants::MAX_SYNC_CHECK_PERIOD_SECS;
use crate::crd::{AppKey, Application};
use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

const MIN_PERIOD: Duration = Duration::from_secs(1);
const MAX_PERIOD: Duration = Duration::from_secs(MAX_SYNC_CHECK_PERIOD_SECS);

#[derive(Debug)]
enum Command {
    Schedule {
        key: AppKey,
        period: Duration,
    },
    Cancel {
        key: AppKey,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<(AppKey, Duration)>>,
    },
}

struct Entry {
    period: Duration,
    cancel: CancellationToken,
    /// Cancelled once the task has exited
    done: CancellationToken,
}

/// Handle to the scheduler supervisor
#[derive(Debug)]
pub struct SyncScheduler {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Start the supervisor; every tick calls `runner`
    #[must_use]
    pub fn spawn(runner: Arc<dyn PeriodicSync>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let supervisor = tokio::spawn(supervise(runner, rx, shutdown.clone()));
        Self {
            commands,
            shutdown,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    /// (Re)start the periodic task for `key`
    pub fn schedule(&self, key: AppKey, period: Duration) {
        if self.commands.send(Command::Schedule { key, period }).is_err() {
            warn!("scheduler.stopped, schedule ignored");
        }
    }

    /// (Re)start the periodic task of an Application at its current period
    pub fn schedule_app(&self, app: &Application) {
        self.schedule(app.app_key(), app.sync_check_period());
    }

    /// Stop the task for `key`. Returns whether one was running.
    pub async fn cancel(&self, key: &AppKey) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Cancel {
            key: key.clone(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Scheduled Applications and their periods, sorted by key
    pub async fn active_tasks(&self) -> Vec<(AppKey, Duration)> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Snapshot { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Cancel every task and wait for the supervisor to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.supervisor.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler.supervisor.failed");
            }
        }
    }
}

async fn supervise(
    runner: Arc<dyn PeriodicSync>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
) {
    let mut entries: HashMap<AppKey, Entry> = HashMap::new();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Schedule { key, period } => {
                        let period = period.clamp(MIN_PERIOD, MAX_PERIOD);
                        let previous = entries.remove(&key).map(|old| {
                            old.cancel.cancel();
                            old.done
                        });
                        let replaced = previous.is_some();
                        let cancel = CancellationToken::new();
                        let done = CancellationToken::new();
                        tasks.spawn(run_periodic(
                            Arc::clone(&runner),
                            key.clone(),
                            period,
                            cancel.clone(),
                            previous,
                            done.clone().drop_guard(),
                        ));
                        info!(app = %key, period_secs = period.as_secs(), replaced, "scheduler.scheduled");
                        entries.insert(key, Entry { period, cancel, done });
                    }
                    Command::Cancel { key, reply } => {
                        let existed = match entries.remove(&key) {
                            Some(entry) => {
                                entry.cancel.cancel();
                                true
                            }
                            None => false,
                        };
                        info!(app = %key, existed, "scheduler.cancelled");
                        let _ = reply.send(existed);
                    }
                    Command::Snapshot { reply } => {
                        let mut snapshot: Vec<_> = entries
                            .iter()
                            .map(|(key, entry)| (key.clone(), entry.period))
                            .collect();
                        snapshot.sort();
                        let _ = reply.send(snapshot);
                    }
                }
                metrics::set_scheduled_tasks(entries.len());
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "scheduler.task.failed");
                }
            }
        }
    }

    for entry in entries.values() {
        entry.cancel.cancel();
    }
    while tasks.join_next().await.is_some() {}
    metrics::set_scheduled_tasks(0);
    debug!("scheduler.stopped");
}

async fn run_periodic(
    runner: Arc<dyn PeriodicSync>,
    key: AppKey,
    period: Duration,
    cancel: CancellationToken,
    previous: Option<CancellationToken>,
    _done: DropGuard,
) {
    if let Some(previous) = previous {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = previous.cancelled() => {}
        }
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match runner.sync_periodic(&key).await {
                    Ok(report) => debug!(app = %key, status = %report.status, "scheduler.tick.done"),
                    Err(e) => error!(app = %key, error = %e, "scheduler.tick.failed"),
                }
            }
        }
    }
    debug!(app = %key, "scheduler.task.exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::engine::SyncReport;
    use crate::sync::error::SyncError;
    use async_trait::async_trait;

    struct Recorder {
        ticks: Mutex<Vec<(AppKey, u64)>>,
        start: Instant,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ticks: Mutex::new(Vec::new()),
                start: Instant::now(),
            })
        }

        fn ticks_of(&self, name: &str) -> Vec<u64> {
            self.ticks
                .lock()
                .unwrap()
                .iter()
                .filter(|(key, _)| key.name == name)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait]
    impl PeriodicSync for Recorder {
        async fn sync_periodic(&self, key: &AppKey) -> Result<SyncReport, SyncError> {
            self.ticks
                .lock()
                .unwrap()
                .push((key.clone(), self.start.elapsed().as_secs()));
            Ok(SyncReport::default())
        }
    }

    fn key(name: &str) -> AppKey {
        AppKey::new(name, "default")
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_period() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(recorder.clone());
        scheduler.schedule(key("web"), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(190)).await;
        assert_eq!(recorder.ticks_of("web"), vec![60, 120, 180]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_task() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(recorder.clone());
        scheduler.schedule(key("web"), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(90)).await;

        scheduler.schedule(key("web"), Duration::from_secs(25));
        tokio::time::sleep(Duration::from_secs(80)).await;

        // The old task's tick at 120 never happens
        assert_eq!(recorder.ticks_of("web"), vec![60, 115, 140, 165]);
        assert_eq!(
            scheduler.active_tasks().await,
            vec![(key("web"), Duration::from_secs(25))]
        );
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_schedules_keep_one_task() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(recorder.clone());
        for _ in 0..5 {
            scheduler.schedule(key("web"), Duration::from_secs(30));
        }
        scheduler.schedule(key("api"), Duration::from_secs(45));

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(recorder.ticks_of("web"), vec![30, 60, 90]);
        assert_eq!(recorder.ticks_of("api"), vec![45, 90]);
        assert_eq!(scheduler.active_tasks().await.len(), 2);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_period_is_capped() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(recorder.clone());
        scheduler.schedule(key("web"), Duration::from_secs(u64::MAX));
        scheduler.schedule(key("api"), Duration::ZERO);

        assert_eq!(
            scheduler.active_tasks().await,
            vec![(key("api"), MIN_PERIOD), (key("web"), MAX_PERIOD)]
        );
        assert!(scheduler.cancel(&key("api")).await);
        tokio::time::sleep(MAX_PERIOD + Duration::from_secs(1)).await;
        assert_eq!(recorder.ticks_of("web"), vec![MAX_SYNC_CHECK_PERIOD_SECS]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(recorder.clone());
        scheduler.schedule(key("web"), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert!(scheduler.cancel(&key("web")).await);
        assert!(!scheduler.cancel(&key("web")).await);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(recorder.ticks_of("web"), vec![10, 20]);
        assert!(scheduler.active_tasks().await.is_empty());
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_tasks() {
        let recorder = Recorder::new();
        let scheduler = SyncScheduler::spawn(recorder.clone());
        scheduler.schedule(key("web"), Duration::from_secs(10));
        scheduler.shutdown().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(recorder.ticks_of("web").is_empty());
        assert!(scheduler.active_tasks().await.is_empty());
        assert!(!scheduler.cancel(&key("web")).await);
    }
}
