use crate::error::AppError;
use crate::routes::backups::find_backup;
use crate::routes::collections::split_names;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use docvault::backup::{ArtifactKind, RestoreMode, RestoreReport, RestoreRequest};
use serde::Deserialize;
use std::sync::Arc;
use zeroize::Zeroizing;

const PASSWORD_HEADER: &str = "x-backup-password";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreQuery {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    confirm_integrity: bool,
    #[serde(default)]
    confirm_conflicts: bool,
    /// Comma-separated subset of the snapshot's collections
    collections: Option<String>,
    /// Verify against (and, with an empty body, restore) a cataloged backup
    backup_id: Option<String>,
}

/// Restore from the uploaded artifact, or from a cataloged backup when the body is empty.
pub async fn restore(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RestoreQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RestoreReport>, AppError> {
    let mode = match query.mode.as_deref() {
        Some(raw) => raw.parse::<RestoreMode>()?,
        None => RestoreMode::default(),
    };
    let password = headers
        .get(PASSWORD_HEADER)
        .map(|v| v.to_str().map(|s| Zeroizing::new(s.to_string())))
        .transpose()
        .map_err(|_| AppError::BadRequest(format!("{PASSWORD_HEADER} is not valid text")))?;

    let manifest = match &query.backup_id {
        Some(id) => Some(find_backup(&state, id).await?),
        None => None,
    };
    let artifact = if !body.is_empty() {
        body
    } else {
        let Some(manifest) = &manifest else {
            return Err(AppError::BadRequest("send an artifact or name a backupId".into()));
        };
        let archive = state.vault.fetch_artifact(manifest, ArtifactKind::Archive, None).await?;
        let artifact = match archive {
            Some(bytes) => Some(bytes),
            None => state.vault.fetch_artifact(manifest, ArtifactKind::Payload, None).await?,
        };
        artifact.ok_or_else(|| AppError::NotFound("Backup has no stored payload".into()))?
    };

    let _guard = state.begin_operation()?;
    let restorer = state.vault.restorer();
    let loaded = restorer
        .load_with_manifest(&artifact, password.as_deref().map(String::as_str), manifest)
        .await?;

    let collections = split_names(query.collections.as_deref());
    let request = RestoreRequest {
        mode,
        collections: (!collections.is_empty()).then_some(collections),
        confirm_integrity: query.confirm_integrity,
        confirm_conflicts: query.confirm_conflicts,
        stop: Some(state.stop.clone()),
    };
    Ok(Json(restorer.restore(&loaded, &request).await?))
}
