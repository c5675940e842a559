use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use gatesync_core::now_utc;
use gatesync_engine::ApiKeysCacheService;
use serde::Serialize;
use serde_json::json;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ApiKeysCacheService>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Snapshot of the sync service: registry, watermark, last cycle, cache stats.
pub async fn diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.service.diagnostics().await))
}

/// Runs one incremental cycle immediately.
pub async fn trigger_refresh(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.trigger_refresh().await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e) => {
            tracing::error!(error = %e, "manual api key refresh failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Cached entry for one key value, with its validity right now.
pub async fn lookup_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match state.service.cache().get(&key).await {
        Some(entry) => {
            let valid = entry.is_valid_at(now_utc());
            (
                StatusCode::OK,
                Json(json!({ "valid": valid, "entry": entry.as_ref() })),
            )
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "api key not cached" })),
        ),
    }
}
