//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON body
//! `{"error": "..."}` with a fitting status code.
//!
//! Store and storage failures are logged with full detail; callers only see
//! a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tabport_core::{DownloadError, RuntimeError, SinkError, StoreError};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("storage error: {0}")]
    Storage(#[from] SinkError),

    /// The export ran and failed before its deadline.
    #[error("export {task_id} failed: {message}")]
    ExportFailed { task_id: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A presigned link that is past its expiry.
    #[error("gone: {0}")]
    Gone(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn internal(what: &str, err: &dyn std::fmt::Display) -> (StatusCode, String) {
    error!(error = %err, "{what}");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            ServerError::Gone(m) => (StatusCode::GONE, m.clone()),

            ServerError::ExportFailed { task_id, message } => {
                let body = json!({ "error": message, "taskId": task_id });
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
            }

            ServerError::Runtime(e) => match e {
                RuntimeError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
                RuntimeError::Store(StoreError::AlreadyExists(id)) => {
                    (StatusCode::CONFLICT, format!("task {id} already exists"))
                }
                RuntimeError::PoolClosed => (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down".to_owned()),
                _ => internal("export runtime error", e),
            },

            ServerError::Download(e) => match e {
                DownloadError::NotFound(id) => (StatusCode::NOT_FOUND, format!("no artifact for task {id}")),
                DownloadError::NotReady { .. } => (StatusCode::CONFLICT, e.to_string()),
                DownloadError::Sink(SinkError::NotFound(_)) => {
                    (StatusCode::NOT_FOUND, "artifact no longer available".to_owned())
                }
                _ => internal("download failed", e),
            },

            ServerError::Storage(e) => match e {
                SinkError::NotFound(_) => (StatusCode::NOT_FOUND, "artifact not found".to_owned()),
                SinkError::InvalidKey(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                SinkError::Unavailable(_) => internal("artifact storage error", e),
            },

            ServerError::Store(e) => internal("task store error", e),
            ServerError::Internal(m) => internal("internal server error", m),
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<validator::ValidationErrors> for ServerError {
    fn from(e: validator::ValidationErrors) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tabport_core::TaskStatus;

    fn status_of(err: ServerError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            status_of(RuntimeError::Validation("unsupported job kind 'x'".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(RuntimeError::Store(StoreError::AlreadyExists("a".into())).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(
                DownloadError::NotReady {
                    task_id: "a".into(),
                    status: TaskStatus::Processing
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(DownloadError::NotFound("a".into()).into()), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ServerError::Gone("expired".into())), StatusCode::GONE);
    }

    #[test]
    fn internal_errors_hide_detail() {
        let response = ServerError::Store(StoreError::Backend("disk I/O error at /var/db".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
