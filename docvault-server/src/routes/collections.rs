use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use docvault::stats::{CollectionDescriptor, CollectionStats};
use docvault::EraseReport;
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_collections))
        .route("/stats", get(collection_stats))
        .route("/erase", post(erase_collections))
}

async fn list_collections(State(state): State<Arc<AppState>>) -> Json<Vec<CollectionDescriptor>> {
    Json(state.vault.descriptors().to_vec())
}

#[derive(Deserialize)]
struct StatsQuery {
    /// Comma-separated collection names
    names: Option<String>,
}

pub(crate) fn split_names(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

async fn collection_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Json<CollectionStats> {
    let mut names = split_names(query.names.as_deref());
    if names.is_empty() {
        names = state.vault.collection_names();
    }
    Json(state.vault.stats(&names).await)
}

#[derive(Deserialize)]
struct EraseRequest {
    collections: Vec<String>,
    #[serde(default)]
    confirm: bool,
}

async fn erase_collections(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EraseRequest>,
) -> Result<Json<EraseReport>, AppError> {
    if body.collections.is_empty() {
        return Err(AppError::BadRequest("no collections selected".into()));
    }
    if !body.confirm {
        return Err(AppError::BadRequest("erasing collections requires \"confirm\": true".into()));
    }
    let _guard = state.begin_operation()?;
    tracing::warn!("Erasing collections: {}", body.collections.join(", "));
    let report = state
        .vault
        .eraser()
        .erase(&body.collections, Some(&*state.stop))
        .await;
    Ok(Json(report))
}
