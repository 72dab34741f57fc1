//! Periodic reconciliation over task state.
//!
//! Both sweepers are stateless: every pass re-reads the store, and every
//! write goes through compare-and-set, so overlapping or repeated passes are
//! harmless.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::runtime::sink::{ArtifactSink, SinkError};
use crate::runtime::store::{StoreError, TaskStore};
use crate::runtime::types::{TaskQuery, TaskStatus, TaskUpdate};

/// Error message recorded on tasks reaped by [`StuckTaskReaper`].
pub const PROCESSING_TIMEOUT: &str = "processing timeout";

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub interval: Duration,
    /// Completed tasks older than this are expired.
    pub retention: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaperPolicy {
    pub interval: Duration,
    /// Processing tasks created longer ago than this are failed.
    pub stale_after: Duration,
}

impl Default for ReaperPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            stale_after: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub changed: usize,
    pub skipped: usize,
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Deletes artifacts of old completed tasks and marks them `EXPIRED`.
pub struct RetentionSweeper<S, A> {
    store: Arc<S>,
    sink: Arc<A>,
    policy: RetentionPolicy,
}

impl<S: TaskStore, A: ArtifactSink> RetentionSweeper<S, A> {
    pub fn new(store: Arc<S>, sink: Arc<A>, policy: RetentionPolicy) -> Self {
        Self { store, sink, policy }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let query = TaskQuery {
            status: Some(TaskStatus::Completed),
            completed_before: Some(cutoff(self.policy.retention)),
            ..TaskQuery::default()
        };
        let tasks = self.store.list_tasks(&query).await?;
        let mut report = SweepReport {
            scanned: tasks.len(),
            ..SweepReport::default()
        };

        for task in tasks {
            if let Some(key) = task.artifact_key.as_deref() {
                match self.sink.delete(key).await {
                    Ok(()) | Err(SinkError::NotFound(_)) => {}
                    Err(e) => {
                        // Leave the task COMPLETED so the next pass retries.
                        warn!(task_id = %task.id, artifact_key = %key, error = %e, "artifact delete failed");
                        report.skipped += 1;
                        continue;
                    }
                }
            }

            match self
                .store
                .compare_and_set_status(&task.id, TaskStatus::Completed, TaskStatus::Expired, TaskUpdate::default())
                .await
            {
                Ok(_) => report.changed += 1,
                Err(e) if e.is_conflict() => report.skipped += 1,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "failed to expire task");
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let interval = self.policy.interval;
        run_periodically("retention", interval, shutdown, || self.sweep_once()).await;
    }
}

/// Fails tasks that have been `PROCESSING` for longer than the threshold.
pub struct StuckTaskReaper<S> {
    store: Arc<S>,
    policy: ReaperPolicy,
}

impl<S: TaskStore> StuckTaskReaper<S> {
    pub fn new(store: Arc<S>, policy: ReaperPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let query = TaskQuery {
            status: Some(TaskStatus::Processing),
            created_before: Some(cutoff(self.policy.stale_after)),
            ..TaskQuery::default()
        };
        let tasks = self.store.list_tasks(&query).await?;
        let mut report = SweepReport {
            scanned: tasks.len(),
            ..SweepReport::default()
        };

        for task in tasks {
            match self
                .store
                .compare_and_set_status(
                    &task.id,
                    TaskStatus::Processing,
                    TaskStatus::Failed,
                    TaskUpdate::failed(PROCESSING_TIMEOUT),
                )
                .await
            {
                Ok(_) => {
                    warn!(task_id = %task.id, created_at = %task.created_at, "stuck task reaped");
                    report.changed += 1;
                }
                Err(e) if e.is_conflict() => report.skipped += 1,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "failed to reap task");
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let interval = self.policy.interval;
        run_periodically("reaper", interval, shutdown, || self.sweep_once()).await;
    }
}

async fn run_periodically<F, Fut>(name: &'static str, period: Duration, mut shutdown: watch::Receiver<bool>, mut pass: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<SweepReport, StoreError>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(sweeper = name, period_secs = period.as_secs(), "sweeper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => match pass().await {
                Ok(report) if report.changed > 0 => info!(
                    sweeper = name,
                    scanned = report.scanned,
                    changed = report.changed,
                    skipped = report.skipped,
                    "sweep finished"
                ),
                Ok(report) => debug!(sweeper = name, scanned = report.scanned, "sweep finished"),
                Err(e) => warn!(sweeper = name, error = %e, "sweep failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(sweeper = name, "sweeper stopped");
}

/// Running sweeper loops. Dropping the handle also stops them.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal both loops and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "sweeper task ended abnormally");
            }
        }
    }
}

/// Start the retention sweeper and the stuck-task reaper.
pub fn spawn_sweepers<S: TaskStore, A: ArtifactSink>(
    store: Arc<S>,
    sink: Arc<A>,
    retention: RetentionPolicy,
    reaper: ReaperPolicy,
) -> SweeperHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention = RetentionSweeper::new(Arc::clone(&store), sink, retention);
    let reaper = StuckTaskReaper::new(store, reaper);

    let handles = vec![
        tokio::spawn(retention.run(shutdown_rx.clone())),
        tokio::spawn(reaper.run(shutdown_rx)),
    ];
    SweeperHandle { shutdown_tx, handles }
}
