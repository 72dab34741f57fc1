//! Presigned artifact fetch.
//!
//! The `download_url` recorded on a background task points here. Access is
//! granted by the signature alone, so the link can be handed to a browser.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use tabport_core::ArtifactSink;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::routes::v1::exports::attachment;
use crate::schemas::v1::task::ArtifactQuery;
use crate::state::AppState;
use crate::storage::{LocalArtifactSink, SignatureError};

#[derive(OpenApi)]
#[openapi(paths(get_artifact))]
pub struct ArtifactsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/artifacts/{*key}", get(get_artifact))
}

#[utoipa::path(
    get,
    path = "/v1/artifacts/{key}",
    tag = "artifacts",
    params(
        ("key" = String, Path, description = "Artifact key"),
        ArtifactQuery,
    ),
    responses(
        (status = 200, description = "The stored spreadsheet", content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (status = 403, description = "Bad signature"),
        (status = 404, description = "Artifact no longer exists"),
        (status = 410, description = "Link expired"),
    )
)]
pub async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(q): Query<ArtifactQuery>,
) -> Result<Response, ServerError> {
    let sink = state.orchestrator.sink();
    match sink.signer().verify(&key, q.expires, &q.signature, Utc::now().timestamp()) {
        Ok(()) => {}
        Err(SignatureError::Expired) => return Err(ServerError::Gone("download link expired".into())),
        Err(e @ SignatureError::Invalid) => {
            debug!(artifact_key = %key, "rejected artifact request");
            return Err(ServerError::Forbidden(e.to_string()));
        }
    }

    let bytes = sink.get(&key).await?;
    Ok(attachment(
        LocalArtifactSink::file_name(&key),
        LocalArtifactSink::content_type(&key),
        None,
        bytes,
    ))
}
