use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    /// Number of items, for list responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
            total_count: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.total_count = Some(count);
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Wraps a list, recording its length.
pub fn list<T: Serialize>(items: Vec<T>) -> ApiResponse<Vec<T>> {
    let count = items.len();
    ApiResponse::success(items).with_count(count)
}
