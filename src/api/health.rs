use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    backend: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok",
        backend: state.store.backend_name(),
        timestamp: chrono::Utc::now(),
    };
    (StatusCode::OK, Json(response))
}
