//! Export submission.
//!
//! `POST /v1/exports/{kind}` races the export against its deadline. A result
//! that arrives in time is streamed back as the spreadsheet itself; otherwise
//! the caller gets `202 Accepted` and a task id to poll.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tabport_core::{Submission, TaskStatus};
use tracing::info;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::schemas::v1::export::{ColumnRequest, DetachedResponse, ExportRequest, JobKindResponse};
use crate::state::AppState;

/// Response header carrying the task id of an inline export.
pub const X_TASK_ID: &str = "x-task-id";

#[derive(OpenApi)]
#[openapi(
    paths(create_export, list_job_kinds),
    components(schemas(ExportRequest, ColumnRequest, DetachedResponse, JobKindResponse))
)]
pub struct ExportsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/exports/{kind}", post(create_export))
        .route("/job-kinds", get(list_job_kinds))
}

/// A file download response with a safe `Content-Disposition`.
pub fn attachment(file_name: &str, content_type: &str, task_id: Option<&str>, bytes: impl Into<Body>) -> Response {
    let file_name: String = file_name
        .chars()
        .map(|c| if c.is_control() || c == '"' || c == '\\' { '_' } else { c })
        .collect();
    let mut response = (
        [
            (CONTENT_TYPE, content_type.to_owned()),
            (CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        bytes.into(),
    )
        .into_response();
    if let Some(value) = task_id.and_then(|id| http::HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(X_TASK_ID, value);
    }
    response
}

#[utoipa::path(
    post,
    path = "/v1/exports/{kind}",
    tag = "exports",
    params(
        ("kind" = String, Path, description = "Registered job kind, e.g. `employees`")
    ),
    request_body(content = ExportRequest, description = "Optional export parameters"),
    responses(
        (status = 200, description = "Finished within the deadline; body is the spreadsheet", content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (status = 202, description = "Continuing in the background", body = DetachedResponse),
        (status = 400, description = "Unknown kind or invalid parameters"),
        (status = 409, description = "Task id already in use"),
        (status = 500, description = "Export failed"),
    )
)]
pub async fn create_export(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let req: ExportRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ExportRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ServerError::BadRequest(format!("invalid request body: {e}")))?
    };
    req.validate()?;

    match state.orchestrator.submit(req.into_job_request(kind)).await? {
        Submission::Completed { task_id, artifact } => Ok(attachment(
            &artifact.file_name,
            &artifact.content_type,
            Some(&task_id),
            artifact.bytes,
        )),
        Submission::Detached { task_id, message } => {
            info!(task_id = %task_id, "export accepted for background processing");
            let body = DetachedResponse {
                status_url: format!("/v1/tasks/{task_id}"),
                task_id,
                message,
                status: TaskStatus::Processing,
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
        Submission::Failed { task_id, message } => Err(ServerError::ExportFailed { task_id, message }),
    }
}

#[utoipa::path(
    get,
    path = "/v1/job-kinds",
    tag = "exports",
    responses(
        (status = 200, description = "Registered job kinds", body = [JobKindResponse]),
    )
)]
pub async fn list_job_kinds(State(state): State<Arc<AppState>>) -> Json<Vec<JobKindResponse>> {
    Json(
        state
            .orchestrator
            .registry()
            .infos()
            .into_iter()
            .map(JobKindResponse::from)
            .collect(),
    )
}
