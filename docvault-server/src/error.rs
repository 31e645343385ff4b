use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use docvault::VaultError;
use serde_json::{json, Value};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Conflict { message: String, details: Option<Value> },

    #[error("{message}")]
    Unprocessable { message: String, details: Option<Value> },

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            details: None,
        }
    }
}

impl From<VaultError> for AppError {
    fn from(e: VaultError) -> Self {
        let message = e.to_string();
        if e.is_transient() {
            return AppError::ServiceUnavailable(message);
        }
        match e {
            VaultError::UnknownNamespace(_) => AppError::NotFound(message),
            VaultError::InvalidIdentifier { .. } | VaultError::Config(_) => AppError::BadRequest(message),
            VaultError::Conflict(report) => AppError::Conflict {
                message,
                details: serde_json::to_value(&report).ok(),
            },
            VaultError::Integrity { expected, actual } => AppError::Unprocessable {
                message,
                details: Some(json!({ "expected": expected, "actual": actual })),
            },
            VaultError::Decryption(_)
            | VaultError::Encryption(_)
            | VaultError::InvalidPayload(_)
            | VaultError::InvalidManifest(_)
            | VaultError::Archive(_) => AppError::Unprocessable { message, details: None },
            VaultError::AllocationExhausted { .. } => AppError::conflict(message),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg, details) = match self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, None),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, None),
            AppError::Conflict { message, details } => (StatusCode::CONFLICT, message, details),
            AppError::Unprocessable { message, details } => (StatusCode::UNPROCESSABLE_ENTITY, message, details),
            AppError::ServiceUnavailable(m) => {
                tracing::warn!("Service unavailable: {m}");
                (StatusCode::SERVICE_UNAVAILABLE, m, None)
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into(), None)
            }
        };
        let body = match details {
            Some(details) => json!({ "error": msg, "details": details }),
            None => json!({ "error": msg }),
        };
        (status, Json(body)).into_response()
    }
}
