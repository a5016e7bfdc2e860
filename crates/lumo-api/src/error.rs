//! API error type.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use lumo_db::StoreError;
use lumo_storage::UploadBatchError;
use lumo_types::api::{FailedUpload, UploadFailureResponse};

/// Handler errors, mapped to HTTP status codes with a JSON `{ "error" }` body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Upload(#[from] UploadBatchError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            Self::Forbidden(e) => (StatusCode::FORBIDDEN, e),
            Self::NotFound(e) => (StatusCode::NOT_FOUND, e),
            Self::Conflict(e) => (StatusCode::CONFLICT, e),
            Self::PayloadTooLarge(e) => (StatusCode::PAYLOAD_TOO_LARGE, e),
            Self::Upload(batch) => return upload_failure(batch),
            Self::Internal(e) => {
                error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn upload_failure(batch: UploadBatchError) -> Response {
    let body = UploadFailureResponse {
        error: batch.to_string(),
        failed: batch
            .failed
            .iter()
            .map(|f| FailedUpload {
                index: f.index,
                name: f.name.clone(),
                error: f.error.to_string(),
            })
            .collect(),
        uploaded: batch.uploaded,
    };
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<StoreError>() {
            Some(StoreError::NotFound { collection, id }) => {
                Self::NotFound(format!("{}/{} not found", collection, id))
            }
            Some(err @ StoreError::InvalidTransition { .. }) => Self::Conflict(err.to_string()),
            Some(err @ StoreError::Duplicate { .. }) => Self::Conflict(err.to_string()),
            _ => Self::Internal(format!("{:#}", e)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
