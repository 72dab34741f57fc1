//! Task persistence.
//!
//! [`TaskStore`] is the only shared mutable state between the request path,
//! the detached lane and the sweepers. Its `compare_and_set_status` is the
//! arbiter for terminal writes: exactly one writer wins and every other one
//! is told the task is already terminal.
//!
//! Trait methods return `impl Future` so no boxing crate is required.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::runtime::types::{TaskId, TaskQuery, TaskRecord, TaskStatus, TaskUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    /// Another writer finished the task first.
    #[error("task {id} is already terminal ({status})")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },

    #[error("task {id} is {actual}, expected {expected}")]
    StatusMismatch {
        id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// The storage backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    /// `true` when the write lost a race rather than failed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyTerminal { .. } | StoreError::StatusMismatch { .. }
        )
    }

    /// Classify a failed compare-and-set given the status actually found.
    pub fn conflict(id: &str, expected: TaskStatus, actual: TaskStatus) -> Self {
        if actual.is_terminal() {
            StoreError::AlreadyTerminal {
                id: id.to_owned(),
                status: actual,
            }
        } else {
            StoreError::StatusMismatch {
                id: id.to_owned(),
                expected,
                actual,
            }
        }
    }
}

/// Keyed, mutable task records.
pub trait TaskStore: Send + Sync + 'static {
    /// Persist a new record; fails with `AlreadyExists` on a duplicate id.
    fn create_task(&self, record: TaskRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_task(&self, id: &str) -> impl Future<Output = Result<Option<TaskRecord>, StoreError>> + Send;

    /// Atomically move `id` from `expected` to `next`, writing `update`.
    ///
    /// Returns the updated record. If the task is no longer in `expected`
    /// the write is rejected with `AlreadyTerminal` or `StatusMismatch`.
    fn compare_and_set_status(
        &self,
        id: &str,
        expected: TaskStatus,
        next: TaskStatus,
        update: TaskUpdate,
    ) -> impl Future<Output = Result<TaskRecord, StoreError>> + Send;

    /// Records matching `query`, newest first.
    fn list_tasks(&self, query: &TaskQuery) -> impl Future<Output = Result<Vec<TaskRecord>, StoreError>> + Send;
}

/// Validate a transition before any backend touches storage.
pub fn check_transition(expected: TaskStatus, next: TaskStatus, update: &TaskUpdate) -> Result<(), StoreError> {
    if !expected.can_transition_to(next) {
        return Err(StoreError::IllegalTransition {
            from: expected,
            to: next,
        });
    }
    update.check(next)
}

/// In-process store backed by a `RwLock<HashMap>`.
///
/// Used by tests and by embedders that do not need durability.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    inner: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Overwrite a record without any transition checks. Test setup only.
    pub async fn insert_raw(&self, record: TaskRecord) {
        self.inner.write().await.insert(record.id.clone(), record);
    }
}

impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        guard.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: TaskStatus,
        next: TaskStatus,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError> {
        check_transition(expected, next, &update)?;

        let mut guard = self.inner.write().await;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        if record.status != expected {
            return Err(StoreError::conflict(id, expected, record.status));
        }
        record.apply(next, update, Utc::now());
        Ok(record.clone())
    }

    async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut records: Vec<TaskRecord> = guard.values().filter(|r| query.matches(r)).cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = MemoryTaskStore::new();
        store.create_task(TaskRecord::new("a", "employees")).await.unwrap();
        let err = store
            .create_task(TaskRecord::new("a", "products"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == "a"));
    }

    #[tokio::test]
    async fn second_terminal_write_is_rejected() {
        let store = MemoryTaskStore::new();
        store.create_task(TaskRecord::new("a", "employees")).await.unwrap();
        store
            .compare_and_set_status("a", TaskStatus::Pending, TaskStatus::Processing, TaskUpdate::default())
            .await
            .unwrap();

        store
            .compare_and_set_status("a", TaskStatus::Processing, TaskStatus::Completed, TaskUpdate::default())
            .await
            .unwrap();
        let err = store
            .compare_and_set_status(
                "a",
                TaskStatus::Processing,
                TaskStatus::Failed,
                TaskUpdate::failed("late"),
            )
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(matches!(err, StoreError::AlreadyTerminal { status: TaskStatus::Completed, .. }));
        let record = store.get_task("a").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn concurrent_finalizers_have_one_winner() {
        let store = MemoryTaskStore::new();
        store.create_task(TaskRecord::new("a", "employees")).await.unwrap();
        store
            .compare_and_set_status("a", TaskStatus::Pending, TaskStatus::Processing, TaskUpdate::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let (next, update) = if i % 2 == 0 {
                    (TaskStatus::Completed, TaskUpdate::stored(format!("k{i}"), "u".into(), "f".into()))
                } else {
                    (TaskStatus::Failed, TaskUpdate::failed(format!("e{i}")))
                };
                store
                    .compare_and_set_status("a", TaskStatus::Processing, next, update)
                    .await
                    .is_ok()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let record = store.get_task("a").await.unwrap().unwrap();
        match record.status {
            TaskStatus::Completed => assert!(record.error_message.is_none()),
            TaskStatus::Failed => assert!(record.artifact_key.is_none()),
            other => panic!("unexpected status {other}"),
        }
    }

    #[tokio::test]
    async fn illegal_transitions_never_reach_storage() {
        let store = MemoryTaskStore::new();
        store.create_task(TaskRecord::new("a", "employees")).await.unwrap();
        let err = store
            .compare_and_set_status("a", TaskStatus::Pending, TaskStatus::Completed, TaskUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        let err = store
            .compare_and_set_status("missing", TaskStatus::Pending, TaskStatus::Processing, TaskUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn listing_is_filtered_and_newest_first() {
        let store = MemoryTaskStore::new();
        let base = Utc::now();
        for (i, kind) in ["employees", "products", "employees"].iter().enumerate() {
            let mut record = TaskRecord::new(format!("t{i}"), *kind);
            record.created_at = base + chrono::Duration::seconds(i as i64);
            store.insert_raw(record).await;
        }

        let all = store.list_tasks(&TaskQuery::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1", "t0"]);

        let employees = store
            .list_tasks(&TaskQuery {
                job_kind: Some("employees".into()),
                limit: Some(1),
                ..TaskQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(employees.len(), 1);
        assert_eq!(employees[0].id, "t2");
    }
}
