use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use docvault::ids::Identifier;
use docvault::store::Fields;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/{namespace}/next", get(next_id))
        .route("/{namespace}/assign", post(assign_id))
        .route("/{namespace}/{candidate}", get(check_id))
}

async fn next_id(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
) -> Result<Json<Identifier>, AppError> {
    Ok(Json(state.vault.next_id(&namespace).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Availability {
    namespace: String,
    candidate: String,
    available: bool,
}

async fn check_id(
    State(state): State<Arc<AppState>>,
    Path((namespace, candidate)): Path<(String, String)>,
) -> Result<Json<Availability>, AppError> {
    let available = state.vault.check_id(&namespace, &candidate).await?;
    Ok(Json(Availability {
        namespace,
        candidate,
        available,
    }))
}

#[derive(Deserialize)]
struct AssignRequest {
    collection: String,
    id: String,
    #[serde(default)]
    fields: Fields,
}

async fn assign_id(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Json(body): Json<AssignRequest>,
) -> Result<(axum::http::StatusCode, Json<Identifier>), AppError> {
    if body.collection.is_empty() || body.id.is_empty() {
        return Err(AppError::BadRequest("collection and id are required".into()));
    }
    let ns = state.vault.namespace(&namespace)?;
    let id = state
        .vault
        .allocator()
        .assign(ns, &body.collection, &body.id, body.fields)
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(id)))
}
