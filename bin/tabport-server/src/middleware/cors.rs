use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn cors_layer(state: Arc<AppState>) -> CorsLayer {
    let wildcard = || {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods(Any)
    };

    let Some(origins_str) = &state.config.cors_allowed_origins else {
        // Wildcard – suitable for development; set TABPORT_CORS_ORIGINS in production.
        return wildcard();
    };
    let origins: Vec<axum::http::HeaderValue> = origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if origins.is_empty() {
        return wildcard();
    }
    CorsLayer::new()
        .allow_origin(origins)
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers([
            axum::http::HeaderName::from_static(super::trace::X_TRACE_ID),
            axum::http::HeaderName::from_static(crate::routes::v1::exports::X_TASK_ID),
            axum::http::header::CONTENT_DISPOSITION,
        ])
}
