use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::runtime::admission::WorkerPool;
use crate::runtime::job::{ExportJob, JobParams, JobRegistry};
use crate::runtime::sink::ArtifactSink;
use crate::runtime::store::{StoreError, TaskStore};
use crate::runtime::types::{
    Artifact, DownloadError, RuntimeError, Submission, TaskId, TaskQuery, TaskRecord, TaskStatus,
    TaskUpdate,
};

/// Message returned to the caller when the deadline wins the race.
pub const DETACHED_MESSAGE: &str = "Export is taking longer than expected. Processing in background...";

/// What the background lane does with the attempt that lost the race.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum DetachPolicy {
    /// Keep awaiting the original attempt; start a fresh one only if that
    /// attempt was lost (panicked or aborted).
    #[default]
    #[strum(serialize = "continue")]
    ContinueOriginal,
    /// Abandon the original attempt and run the job again from scratch.
    /// The abandoned attempt keeps running; its result is discarded.
    #[strum(serialize = "rerun")]
    Rerun,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub worker_capacity: usize,
    /// Used when neither the request nor the job kind sets a deadline.
    pub default_deadline: Duration,
    pub detach_policy: DetachPolicy,
    /// Lifetime of the presigned URL recorded on detached tasks.
    pub url_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_capacity: 4,
            default_deadline: Duration::from_millis(1000),
            detach_policy: DetachPolicy::ContinueOriginal,
            url_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// One export request as the orchestrator sees it.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub kind: String,
    pub params: JobParams,
    /// Overrides the job kind's default deadline.
    pub deadline: Option<Duration>,
    /// Caller-supplied correlation id; a UUID is generated when absent.
    pub task_id: Option<TaskId>,
}

impl JobRequest {
    pub fn new(kind: impl Into<String>, params: JobParams) -> Self {
        Self {
            kind: kind.into(),
            params,
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

type Attempt = JoinHandle<Result<Artifact, RuntimeError>>;

/// Races each export against its deadline and detaches the slow ones.
///
/// # Usage
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::new(store, sink, registry, OrchestratorConfig::default());
/// match orchestrator.submit(JobRequest::new("employees", params)).await? {
///     Submission::Completed { artifact, .. } => serve(artifact.bytes),
///     Submission::Detached { task_id, .. } => poll(task_id),
///     Submission::Failed { message, .. } => report(message),
/// }
/// ```
pub struct Orchestrator<S, A> {
    store: Arc<S>,
    sink: Arc<A>,
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    config: Arc<OrchestratorConfig>,
}

impl<S, A> Clone for Orchestrator<S, A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sink: Arc::clone(&self.sink),
            registry: Arc::clone(&self.registry),
            pool: self.pool.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, A> std::fmt::Debug for Orchestrator<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: TaskStore, A: ArtifactSink> Orchestrator<S, A> {
    pub fn new(store: Arc<S>, sink: Arc<A>, registry: JobRegistry, config: OrchestratorConfig) -> Self {
        Self {
            store,
            sink,
            registry: Arc::new(registry),
            pool: WorkerPool::new(config.worker_capacity),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<A> {
        &self.sink
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create a task, run the job and race it against the deadline.
    ///
    /// Validation problems are returned as `Err` before any task exists.
    /// Once the task is created every outcome, including job failure, is a
    /// `Submission`; `Err` then only signals a store failure.
    pub async fn submit(&self, request: JobRequest) -> Result<Submission, RuntimeError> {
        let JobRequest {
            kind,
            params,
            deadline,
            task_id,
        } = request;

        let job = self.registry.resolve(&kind, &params)?;
        let deadline = deadline
            .or_else(|| job.default_deadline())
            .unwrap_or(self.config.default_deadline);
        let task_id = match task_id {
            Some(id) if id.trim().is_empty() => {
                return Err(RuntimeError::Validation("task id must not be blank".into()));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let record = TaskRecord::new(task_id.clone(), kind.clone())
            .with_record_count(params.count.map(|c| c as u64));
        self.store.create_task(record).await?;
        self.store
            .compare_and_set_status(
                &task_id,
                TaskStatus::Pending,
                TaskStatus::Processing,
                TaskUpdate::default(),
            )
            .await?;

        info!(
            task_id = %task_id,
            job_kind = %kind,
            deadline_ms = deadline.as_millis() as u64,
            "export submitted"
        );

        // The race runs in its own task so the outcome is recorded even when
        // the caller stops waiting.
        let (reply, answer) = oneshot::channel();
        let span = info_span!("export", task_id = %task_id, job_kind = %kind);
        let this = self.clone();
        let supervised_id = task_id.clone();
        tokio::spawn(
            async move { this.supervise(supervised_id, job, params, deadline, reply).await }.instrument(span),
        );

        match answer.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RuntimeError::WorkerLost(format!("supervisor for task {task_id} exited"))),
        }
    }

    pub async fn get_status(&self, task_id: &str) -> Result<Option<TaskRecord>, RuntimeError> {
        Ok(self.store.get_task(task_id).await?)
    }

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>, RuntimeError> {
        Ok(self.store.list_tasks(query).await?)
    }

    /// Fetch the stored artifact of a detached task.
    ///
    /// Tasks completed inline never stored anything and report `NotFound`.
    pub async fn download(&self, task_id: &str) -> Result<(TaskRecord, Bytes), DownloadError> {
        let record = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| DownloadError::NotFound(task_id.to_owned()))?;

        match (record.status, record.artifact_key.as_deref()) {
            (TaskStatus::Pending | TaskStatus::Processing, _) => Err(DownloadError::NotReady {
                task_id: record.id.clone(),
                status: record.status,
            }),
            (TaskStatus::Completed, Some(key)) => {
                let bytes = self.sink.get(key).await?;
                Ok((record, bytes))
            }
            _ => Err(DownloadError::NotFound(record.id)),
        }
    }

    /// Spawn one attempt; it waits for a worker slot before running.
    fn spawn_attempt(&self, job: Arc<dyn ExportJob>, params: JobParams) -> Attempt {
        let pool = self.pool.clone();
        tokio::spawn(
            async move {
                let _permit = pool.acquire().await?;
                Ok::<_, RuntimeError>(job.run(params).await?)
            }
            .in_current_span(),
        )
    }

    /// Race one attempt against `deadline` and own the task until it is
    /// finalized or handed to the background lane.
    async fn supervise(
        self,
        task_id: TaskId,
        job: Arc<dyn ExportJob>,
        params: JobParams,
        deadline: Duration,
        reply: oneshot::Sender<Result<Submission, RuntimeError>>,
    ) {
        let started = Instant::now();
        let mut attempt = self.spawn_attempt(Arc::clone(&job), params.clone());

        let joined = tokio::select! {
            joined = &mut attempt => joined,
            _ = tokio::time::sleep(deadline) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    policy = %self.config.detach_policy,
                    "deadline reached; detaching export"
                );
                let _ = reply.send(Ok(Submission::Detached {
                    task_id: task_id.clone(),
                    message: DETACHED_MESSAGE.to_owned(),
                }));
                self.run_detached(task_id, job, params, attempt).await;
                return;
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let outcome = match flatten(joined) {
            Ok(artifact) if reply.is_closed() => {
                info!(elapsed_ms, "caller went away; storing result for download");
                self.persist(&task_id, artifact, started).await;
                return;
            }
            Ok(artifact) => self.finish_inline(task_id, artifact, elapsed_ms).await,
            Err(e) => {
                let message = e.to_string();
                warn!(elapsed_ms, error = %message, "export failed before deadline");
                self.mark_failed(&task_id, &message).await;
                Ok(Submission::Failed { task_id, message })
            }
        };
        if reply.send(outcome).is_err() {
            debug!("caller went away before the result was delivered");
        }
    }

    async fn finish_inline(
        &self,
        task_id: TaskId,
        artifact: Artifact,
        elapsed_ms: u64,
    ) -> Result<Submission, RuntimeError> {
        let update = TaskUpdate::default().with_record_count(artifact.record_count);
        match self
            .store
            .compare_and_set_status(&task_id, TaskStatus::Processing, TaskStatus::Completed, update)
            .await
        {
            Ok(_) => {
                info!(task_id = %task_id, elapsed_ms, file_name = %artifact.file_name, "export completed inline");
                Ok(Submission::Completed { task_id, artifact })
            }
            Err(e) if e.is_conflict() => {
                warn!(task_id = %task_id, error = %e, "inline result discarded; task finalized elsewhere");
                Ok(Submission::Failed {
                    task_id,
                    message: e.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Background continuation after the deadline won.
    async fn run_detached(self, task_id: TaskId, job: Arc<dyn ExportJob>, params: JobParams, original: Attempt) {
        let started = Instant::now();
        let outcome = match self.config.detach_policy {
            DetachPolicy::ContinueOriginal => match original.await {
                Ok(result) => result,
                Err(join_err) => {
                    warn!(error = %join_err, "original attempt lost; starting a fresh one");
                    flatten(self.spawn_attempt(job, params).await)
                }
            },
            DetachPolicy::Rerun => {
                // Dropping the handle detaches the original attempt without cancelling it.
                drop(original);
                flatten(self.spawn_attempt(job, params).await)
            }
        };

        match outcome {
            Ok(artifact) => self.persist(&task_id, artifact, started).await,
            Err(e) => {
                warn!(error = %e, "detached export failed");
                self.mark_failed(&task_id, &e.to_string()).await;
            }
        }
    }

    /// Upload `artifact`, then record it on the task; an upload whose
    /// terminal write loses is deleted again.
    async fn persist(&self, task_id: &str, artifact: Artifact, started: Instant) {
        let (key, url) = match self.store_artifact(&artifact).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(error = %e, "artifact upload failed");
                self.mark_failed(task_id, &e.to_string()).await;
                return;
            }
        };

        let update = TaskUpdate::stored(key.clone(), url, artifact.file_name.clone())
            .with_record_count(artifact.record_count);
        match self
            .store
            .compare_and_set_status(task_id, TaskStatus::Processing, TaskStatus::Completed, update)
            .await
        {
            Ok(_) => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                artifact_key = %key,
                "export stored"
            ),
            Err(e) => {
                if e.is_conflict() {
                    warn!(error = %e, "stored result discarded; removing orphaned artifact");
                } else {
                    error!(error = %e, "failed to record stored completion");
                }
                if let Err(e) = self.sink.delete(&key).await {
                    warn!(artifact_key = %key, error = %e, "failed to remove orphaned artifact");
                }
            }
        }
    }

    async fn store_artifact(&self, artifact: &Artifact) -> Result<(String, String), RuntimeError> {
        let key = self
            .sink
            .put(artifact.bytes.clone(), &artifact.file_name, &artifact.content_type)
            .await?;
        match self.sink.presigned_url(&key, self.config.url_ttl).await {
            Ok(url) => Ok((key, url)),
            Err(e) => {
                if let Err(del) = self.sink.delete(&key).await {
                    warn!(artifact_key = %key, error = %del, "failed to remove unsigned artifact");
                }
                Err(e.into())
            }
        }
    }

    /// Move a processing task to `FAILED`; losing the race is not an error.
    async fn mark_failed(&self, task_id: &str, message: &str) {
        match self
            .store
            .compare_and_set_status(
                task_id,
                TaskStatus::Processing,
                TaskStatus::Failed,
                TaskUpdate::failed(message),
            )
            .await
        {
            Ok(_) => {}
            Err(e @ (StoreError::AlreadyTerminal { .. } | StoreError::StatusMismatch { .. })) => {
                debug!(task_id, error = %e, "failure not recorded; task already finalized");
            }
            Err(e) => error!(task_id, error = %e, "failed to record task failure"),
        }
    }
}

fn flatten(
    joined: Result<Result<Artifact, RuntimeError>, tokio::task::JoinError>,
) -> Result<Artifact, RuntimeError> {
    joined.unwrap_or_else(|e| Err(RuntimeError::WorkerLost(e.to_string())))
}
