pub mod backups;
pub mod collections;
pub mod health;
pub mod ids;
pub mod restore;

use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.body_limit;

    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::status))
        .nest("/api/collections", collections::router(state.clone()))
        .nest("/api/ids", ids::router(state.clone()))
        .nest("/api/backups", backups::router(state.clone()))
        .route("/api/restore", post(restore::restore))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
