use serde::{Deserialize, Serialize};
use tabport_core::{TaskQuery, TaskRecord, TaskStatus};
use utoipa::{IntoParams, ToSchema};

use crate::error::ServerError;

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TaskListQuery {
    /// `PENDING`, `PROCESSING`, `COMPLETED`, `FAILED` or `EXPIRED`.
    pub status: Option<String>,
    /// Job kind, e.g. `employees`.
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

impl TaskListQuery {
    pub fn to_query(&self) -> Result<TaskQuery, ServerError> {
        let status = self
            .status
            .as_deref()
            .map(|s| {
                s.parse::<TaskStatus>()
                    .map_err(|_| ServerError::BadRequest(format!("unknown task status '{s}'")))
            })
            .transpose()?;
        Ok(TaskQuery {
            status,
            job_kind: self.kind.clone(),
            limit: self.limit,
            ..TaskQuery::default()
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: String,
    pub job_kind: String,
    #[schema(value_type = String, example = "COMPLETED")]
    pub status: TaskStatus,
    pub record_count: Option<u64>,
    pub created_at: String,
    pub completed_at: Option<String>,
    /// Present only for exports that finished in the background.
    pub download_url: Option<String>,
    pub file_name: Option<String>,
    pub error_message: Option<String>,
}

impl From<TaskRecord> for TaskResponse {
    fn from(record: TaskRecord) -> Self {
        Self {
            id: record.id,
            job_kind: record.job_kind,
            status: record.status,
            record_count: record.record_count,
            created_at: record.created_at.to_rfc3339(),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
            download_url: record.download_url,
            file_name: record.file_name,
            error_message: record.error_message,
        }
    }
}

/// Query half of a presigned artifact URL.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ArtifactQuery {
    pub expires: i64,
    pub signature: String,
}
