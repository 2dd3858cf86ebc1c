//! Read-only HTTP introspection of the variant directory and tombstone ledger.

pub mod error;
pub mod health;
pub mod response;
pub mod variants;

use axum::{routing::get, Router};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::Config, engine::NetworkStore};

#[derive(Clone)]
pub struct AppState {
    pub store: NetworkStore,
}

impl AppState {
    pub fn new(store: NetworkStore) -> Self {
        Self { store }
    }
}

pub fn router(state: AppState, cfg: &Config) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/v1", variants::router())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::new(Duration::from_secs(cfg.server.request_timeout_secs))),
        )
        .layer(TraceLayer::new_for_http())
}
