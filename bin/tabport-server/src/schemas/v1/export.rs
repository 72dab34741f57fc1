use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabport_core::{ColumnParam, JobInfo, JobParams, JobRequest, TaskStatus};
use utoipa::ToSchema;
use validator::Validate;

/// Body of `POST /v1/exports/{kind}`. Every field is optional.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
    /// Number of records for the sample kinds.
    #[validate(range(max = 1_000_000))]
    pub count: Option<usize>,

    /// Artificial source latency in milliseconds.
    #[validate(range(max = 600_000))]
    pub delay_ms: Option<u64>,

    /// How long to wait for an inline result before detaching.
    #[validate(range(min = 1, max = 600_000))]
    pub deadline_ms: Option<u64>,

    /// Caller-chosen task id; a UUID is generated when absent.
    #[validate(length(min = 1, max = 128))]
    pub task_id: Option<String>,

    pub title: Option<String>,

    #[validate(length(min = 1, max = 200))]
    pub file_name: Option<String>,

    /// Inline rows for the `custom` kind.
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<serde_json::Value>,

    #[validate(nested)]
    pub columns: Vec<ColumnRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct ColumnRequest {
    #[validate(length(min = 1))]
    pub field: String,
    pub header: String,
}

impl ExportRequest {
    pub fn into_job_request(self, kind: String) -> JobRequest {
        let params = JobParams {
            count: self.count,
            delay_ms: self.delay_ms,
            rows: self.rows,
            columns: self
                .columns
                .into_iter()
                .map(|c| ColumnParam {
                    field: c.field,
                    header: c.header,
                })
                .collect(),
            title: self.title,
            file_name: self.file_name,
        };
        let mut request = JobRequest::new(kind, params);
        if let Some(ms) = self.deadline_ms {
            request = request.with_deadline(Duration::from_millis(ms));
        }
        if let Some(id) = self.task_id {
            request = request.with_task_id(id);
        }
        request
    }
}

/// Returned with `202 Accepted` when the export continues in the background.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetachedResponse {
    pub task_id: String,
    pub message: String,
    #[schema(value_type = String, example = "PROCESSING")]
    pub status: TaskStatus,
    pub status_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobKindResponse {
    pub kind: String,
    pub description: String,
    pub default_deadline_ms: Option<u64>,
    pub templated: bool,
}

impl From<JobInfo> for JobKindResponse {
    fn from(info: JobInfo) -> Self {
        Self {
            kind: info.kind,
            description: info.description,
            default_deadline_ms: info.default_deadline_ms,
            templated: info.templated,
        }
    }
}
