pub mod artifacts;
pub mod exports;
pub mod tasks;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/v1`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(exports::router())
        .merge(tasks::router())
        .merge(artifacts::router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = V1Api::openapi();
    spec.merge(exports::ExportsApi::openapi());
    spec.merge(tasks::TasksApi::openapi());
    spec.merge(artifacts::ArtifactsApi::openapi());
    spec
}
