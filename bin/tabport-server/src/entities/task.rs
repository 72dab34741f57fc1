//! SQLite implementation of [`TaskStore`].
//!
//! Migrations run on [`SqliteStore::connect`]; `sqlx::migrate!` embeds the
//! `./migrations` directory at compile time. Queries use the runtime-checked
//! `sqlx::query` form so no `DATABASE_URL` is needed to build.
//!
//! Compare-and-set is a single `UPDATE ... WHERE id = ? AND status = ?`;
//! SQLite serializes writers, so exactly one of several racing finalizers
//! sees a changed row.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tabport_core::runtime::store::check_transition;
use tabport_core::{StoreError, TaskQuery, TaskRecord, TaskStatus, TaskStore, TaskUpdate};
use tracing::warn;

const COLUMNS: &str = "id, job_kind, status, record_count, created_at, completed_at, \
                       artifact_key, download_url, file_name, error_message";

type TaskRow = (
    String,
    String,
    String,
    Option<i64>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// SQLite-backed task store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL such as `"sqlite://tabport.db"` or
    /// `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = if url.contains(":memory:") {
            // Every connection to :memory: is a separate database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options)
                .await?
        };
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

impl TaskStore for SqliteStore {
    async fn create_task(&self, record: TaskRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO export_tasks (id, job_kind, status, record_count, created_at, completed_at, \
             artifact_key, download_url, file_name, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&record.id)
        .bind(&record.job_kind)
        .bind(record.status.as_ref())
        .bind(record.record_count.map(to_i64))
        .bind(timestamp(record.created_at))
        .bind(record.completed_at.map(timestamp))
        .bind(&record.artifact_key)
        .bind(&record.download_url)
        .bind(&record.file_name)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::AlreadyExists(record.id)),
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let row: Option<TaskRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM export_tasks WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.map(from_row).transpose()
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: TaskStatus,
        next: TaskStatus,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError> {
        check_transition(expected, next, &update)?;

        let completed_at = next.is_terminal().then(|| timestamp(Utc::now()));
        let result = sqlx::query(
            "UPDATE export_tasks SET \
             status = ?1, \
             completed_at = COALESCE(completed_at, ?2), \
             record_count = COALESCE(?3, record_count), \
             artifact_key = COALESCE(?4, artifact_key), \
             download_url = COALESCE(?5, download_url), \
             file_name = COALESCE(?6, file_name), \
             error_message = COALESCE(?7, error_message) \
             WHERE id = ?8 AND status = ?9",
        )
        .bind(next.as_ref())
        .bind(completed_at)
        .bind(update.record_count.map(to_i64))
        .bind(update.artifact_key)
        .bind(update.download_url)
        .bind(update.file_name)
        .bind(update.error_message)
        .bind(id)
        .bind(expected.as_ref())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let current = self.get_task(id).await?;
        match current {
            None => Err(StoreError::NotFound(id.to_owned())),
            Some(record) if result.rows_affected() == 0 => Err(StoreError::conflict(id, expected, record.status)),
            Some(record) => Ok(record),
        }
    }

    async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>, StoreError> {
        let mut sql = format!("SELECT {COLUMNS} FROM export_tasks WHERE 1 = 1");
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if query.job_kind.is_some() {
            sql.push_str(" AND job_kind = ?");
        }
        if query.created_before.is_some() {
            sql.push_str(" AND created_at < ?");
        }
        if query.completed_before.is_some() {
            sql.push_str(" AND completed_at IS NOT NULL AND completed_at < ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query_as::<_, TaskRow>(&sql);
        if let Some(status) = query.status {
            q = q.bind(status.as_ref().to_owned());
        }
        if let Some(kind) = &query.job_kind {
            q = q.bind(kind.clone());
        }
        if let Some(before) = query.created_before {
            q = q.bind(timestamp(before));
        }
        if let Some(before) = query.completed_before {
            q = q.bind(timestamp(before));
        }
        if let Some(limit) = query.limit {
            q = q.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = q.fetch_all(&self.pool).await.map_err(StoreError::backend)?;
        rows.into_iter().map(from_row).collect()
    }
}

// ── row mapping ──────────────────────────────────────────────────────────────

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        warn!(raw = %raw, error = %e, "failed to parse task timestamp; using now");
        Utc::now()
    })
}

fn to_i64(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn from_row(row: TaskRow) -> Result<TaskRecord, StoreError> {
    let (
        id,
        job_kind,
        status,
        record_count,
        created_at,
        completed_at,
        artifact_key,
        download_url,
        file_name,
        error_message,
    ) = row;
    let status = TaskStatus::from_str(&status)
        .map_err(|_| StoreError::Backend(format!("task {id} has unknown status '{status}'")))?;

    Ok(TaskRecord {
        id,
        job_kind,
        status,
        record_count: record_count.and_then(|c| u64::try_from(c).ok()),
        created_at: parse_timestamp(&created_at),
        completed_at: completed_at.as_deref().map(parse_timestamp),
        artifact_key,
        download_url,
        file_name,
        error_message,
    })
}
