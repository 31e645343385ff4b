use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.vault.store().name(),
    }))
}

/// Current position of the snapshot builder and the restore engine.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "snapshot": state.vault.builder().phase(),
        "restore": state.vault.restorer().phase(),
        "blob": state.vault.blob().map(|b| b.describe()),
    }))
}
