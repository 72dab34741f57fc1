use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::job::JobError;
use crate::runtime::sink::SinkError;
use crate::runtime::store::StoreError;

/// Opaque task identifier; caller-supplied or a generated UUID.
pub type TaskId = String;

/// Lifecycle state of an export task.
///
/// Transitions only move forward:
/// `PENDING → PROCESSING → {COMPLETED, FAILED}` and `COMPLETED → EXPIRED`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl TaskStatus {
    /// `true` for every status a task can finish in.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Expired)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
                | (TaskStatus::Completed, TaskStatus::Expired)
        )
    }
}

/// The persisted record for one submitted export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub job_kind: String,
    pub status: TaskStatus,
    pub record_count: Option<u64>,
    pub created_at: DateTime<Utc>,
    /// Set once, on the first transition into a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    pub artifact_key: Option<String>,
    pub download_url: Option<String>,
    pub file_name: Option<String>,
    pub error_message: Option<String>,
}

impl TaskRecord {
    pub fn new(id: impl Into<TaskId>, job_kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_kind: job_kind.into(),
            status: TaskStatus::Pending,
            record_count: None,
            created_at: Utc::now(),
            completed_at: None,
            artifact_key: None,
            download_url: None,
            file_name: None,
            error_message: None,
        }
    }

    pub fn with_record_count(mut self, count: Option<u64>) -> Self {
        self.record_count = count;
        self
    }

    /// Apply a validated transition in place.
    ///
    /// Store implementations call this after checking the expected status so
    /// every backend shares the same field rules.
    pub fn apply(&mut self, next: TaskStatus, update: TaskUpdate, now: DateTime<Utc>) {
        self.status = next;
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if update.record_count.is_some() {
            self.record_count = update.record_count;
        }
        if update.artifact_key.is_some() {
            self.artifact_key = update.artifact_key;
        }
        if update.download_url.is_some() {
            self.download_url = update.download_url;
        }
        if update.file_name.is_some() {
            self.file_name = update.file_name;
        }
        if update.error_message.is_some() {
            self.error_message = update.error_message;
        }
    }
}

/// Optional fields written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub record_count: Option<u64>,
    pub artifact_key: Option<String>,
    pub download_url: Option<String>,
    pub file_name: Option<String>,
    pub error_message: Option<String>,
}

impl TaskUpdate {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn stored(key: String, download_url: String, file_name: String) -> Self {
        Self {
            artifact_key: Some(key),
            download_url: Some(download_url),
            file_name: Some(file_name),
            ..Self::default()
        }
    }

    pub fn with_record_count(mut self, count: u64) -> Self {
        self.record_count = Some(count);
        self
    }

    /// Reject field combinations the target status may not carry.
    pub fn check(&self, next: TaskStatus) -> Result<(), StoreError> {
        let has_artifact =
            self.artifact_key.is_some() || self.download_url.is_some() || self.file_name.is_some();
        if has_artifact && !matches!(next, TaskStatus::Completed | TaskStatus::Expired) {
            return Err(StoreError::InvalidUpdate(format!(
                "artifact fields are not allowed on {next}"
            )));
        }
        if self.error_message.is_some() && next != TaskStatus::Failed {
            return Err(StoreError::InvalidUpdate(format!(
                "error message is not allowed on {next}"
            )));
        }
        Ok(())
    }
}

/// Filter for [`TaskStore::list_tasks`](crate::runtime::store::TaskStore::list_tasks).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub job_kind: Option<String>,
    pub created_before: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TaskQuery {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        if self.status.is_some_and(|s| s != record.status) {
            return false;
        }
        if self.job_kind.as_deref().is_some_and(|k| k != record.job_kind) {
            return false;
        }
        if self.created_before.is_some_and(|t| record.created_at >= t) {
            return false;
        }
        if let Some(t) = self.completed_before {
            match record.completed_at {
                Some(done) if done < t => {}
                _ => return false,
            }
        }
        true
    }
}

/// A rendered spreadsheet ready to return or store.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: String,
    pub record_count: u64,
}

/// Outcome handed back to the caller of `Orchestrator::submit`.
#[derive(Debug, Clone)]
pub enum Submission {
    /// The job beat the deadline; bytes are returned inline.
    Completed { task_id: TaskId, artifact: Artifact },
    /// The deadline won; poll the task for the stored artifact.
    Detached { task_id: TaskId, message: String },
    /// The job failed before the deadline.
    Failed { task_id: TaskId, message: String },
}

impl Submission {
    pub fn task_id(&self) -> &str {
        match self {
            Submission::Completed { task_id, .. }
            | Submission::Detached { task_id, .. }
            | Submission::Failed { task_id, .. } => task_id,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Submission::Completed { .. })
    }
}

/// Errors produced by the runtime layer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The job spec was rejected before a task was created.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Job(#[from] JobError),

    /// A worker task panicked or was aborted.
    #[error("worker terminated unexpectedly: {0}")]
    WorkerLost(String),

    /// The worker pool was shut down.
    #[error("worker pool closed")]
    PoolClosed,
}

/// Why a download could not be served.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {task_id} has no artifact yet (status {status})")]
    NotReady { task_id: TaskId, status: TaskStatus },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
