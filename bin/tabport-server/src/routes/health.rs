//! Liveness plus a snapshot of the export worker pool.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tabport_core::PoolStats;
use utoipa::{OpenApi, ToSchema};

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health), components(schemas(HealthResponse, WorkerPoolResponse)))]
pub struct HealthApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `draining` once shutdown has closed the pool.
    pub status: &'static str,
    pub version: &'static str,
    pub workers: WorkerPoolResponse,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolResponse {
    pub capacity: usize,
    /// Jobs currently holding a slot.
    pub active: usize,
    /// Jobs waiting for a slot.
    pub queued: usize,
    pub available: usize,
}

impl From<PoolStats> for HealthResponse {
    fn from(stats: PoolStats) -> Self {
        Self {
            status: if stats.closed { "draining" } else { "ok" },
            version: env!("CARGO_PKG_VERSION"),
            workers: WorkerPoolResponse {
                capacity: stats.capacity,
                active: stats.active,
                queued: stats.queued,
                available: stats.capacity.saturating_sub(stats.active),
            },
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is up; includes worker pool usage", body = HealthResponse)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.orchestrator.pool().stats().into())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
