//! Task status, listing and download.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::routes::v1::exports::attachment;
use crate::schemas::v1::task::{TaskListQuery, TaskResponse};
use crate::state::AppState;
use crate::storage::LocalArtifactSink;

#[derive(OpenApi)]
#[openapi(
    paths(list_tasks, get_task, download_task),
    components(schemas(TaskResponse, TaskListQuery))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/download", get(download_task))
}

#[utoipa::path(
    get,
    path = "/v1/tasks",
    tag = "tasks",
    params(TaskListQuery),
    responses(
        (status = 200, description = "Tasks listed, newest first", body = [TaskResponse]),
        (status = 400, description = "Unknown status filter"),
        (status = 500, description = "Store error"),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TaskListQuery>,
) -> Result<Json<Vec<TaskResponse>>, ServerError> {
    let records = state.orchestrator.list_tasks(&q.to_query()?).await?;
    Ok(Json(records.into_iter().map(TaskResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task id returned by the export call")
    ),
    responses(
        (status = 200, description = "Task retrieved", body = TaskResponse),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Store error"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ServerError> {
    let record = state
        .orchestrator
        .get_status(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("task {id} not found")))?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}/download",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task id of a background export")
    ),
    responses(
        (status = 200, description = "The stored spreadsheet", content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (status = 404, description = "Unknown task, or no stored artifact"),
        (status = 409, description = "Export still running"),
    )
)]
pub async fn download_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let (record, bytes) = state.orchestrator.download(&id).await?;
    let key = record.artifact_key.as_deref().unwrap_or_default();
    let file_name = record
        .file_name
        .as_deref()
        .unwrap_or_else(|| LocalArtifactSink::file_name(key));
    Ok(attachment(
        file_name,
        LocalArtifactSink::content_type(key),
        Some(&record.id),
        bytes,
    ))
}
