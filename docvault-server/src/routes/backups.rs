use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use docvault::backup::{ArtifactKind, BackupManifest, SnapshotOptions};
use docvault::CollectionFailure;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/{id}", get(get_backup).delete(delete_backup))
        .route("/{id}/artifact/{kind}", get(get_artifact))
}

async fn list_backups(State(state): State<Arc<AppState>>) -> Result<Json<Vec<BackupManifest>>, AppError> {
    Ok(Json(state.vault.catalog().list().await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBackupRequest {
    collections: Vec<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    tabular: bool,
    #[serde(default)]
    archive: bool,
    #[serde(default)]
    skip_failed: bool,
}

#[derive(Serialize)]
struct CreateBackupResponse {
    manifest: BackupManifest,
    failures: Vec<CollectionFailure>,
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBackupRequest>,
) -> Result<(StatusCode, Json<CreateBackupResponse>), AppError> {
    if body.collections.is_empty() {
        return Err(AppError::BadRequest("no collections selected".into()));
    }
    let password = body.password.filter(|p| !p.is_empty()).map(Zeroizing::new);
    let options = SnapshotOptions {
        encrypt: password.is_some(),
        password,
        tabular: body.tabular,
        archive: body.archive,
        upload: state.vault.blob().is_some(),
        skip_failed: body.skip_failed,
    };

    let _guard = state.begin_operation()?;
    let outcome = state.vault.builder().build(&body.collections, &options).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateBackupResponse {
            manifest: outcome.manifest,
            failures: outcome.failures,
        }),
    ))
}

pub(crate) async fn find_backup(state: &AppState, id: &str) -> Result<BackupManifest, AppError> {
    state
        .vault
        .catalog()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Backup not found".into()))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupManifest>, AppError> {
    Ok(Json(find_backup(&state, &id).await?))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.vault.catalog().remove(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Backup not found".into()))
    }
}

#[derive(Deserialize)]
struct ArtifactQuery {
    /// Required for tabular artifacts
    collection: Option<String>,
}

async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path((id, kind)): Path<(String, String)>,
    Query(query): Query<ArtifactQuery>,
) -> Result<Response, AppError> {
    let kind = match kind.as_str() {
        "payload" => ArtifactKind::Payload,
        "archive" => ArtifactKind::Archive,
        "tabular" => ArtifactKind::Tabular,
        other => return Err(AppError::BadRequest(format!("unknown artifact kind '{other}'"))),
    };
    let manifest = find_backup(&state, &id).await?;
    let bytes = state
        .vault
        .fetch_artifact(&manifest, kind, query.collection.as_deref())
        .await?
        .ok_or_else(|| AppError::NotFound("Artifact was not stored for this backup".into()))?;

    let (content_type, file_name) = match kind {
        ArtifactKind::Payload if manifest.encrypted => ("application/octet-stream", format!("docvault-{id}.json.enc")),
        ArtifactKind::Payload => ("application/json", format!("docvault-{id}.json")),
        ArtifactKind::Archive => ("application/zstd", format!("docvault-{id}.dva")),
        ArtifactKind::Tabular => (
            "text/csv",
            format!("docvault-{id}-{}.csv", query.collection.unwrap_or_default()),
        ),
    };
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        bytes,
    )
        .into_response())
}
