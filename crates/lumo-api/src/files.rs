use axum::{
    Extension,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use lumo_storage::validate_key;
use lumo_types::api::Claims;

use crate::error::ApiError;
use crate::orders::load_order_for;
use crate::state::AppState;

/// GET /files/{*key}: serve a stored delivery file to the order's brand or
/// creator.
pub async fn download_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    validate_key(&key).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let order_id = key
        .strip_prefix("deliveries/")
        .and_then(|rest| rest.split_once('/'))
        .and_then(|(id, _)| id.parse::<Uuid>().ok())
        .ok_or_else(|| ApiError::NotFound("file not found".into()))?;
    load_order_for(&state, order_id, &claims)
        .await
        .map_err(|_| ApiError::NotFound("file not found".into()))?;

    let bytes = state
        .uploads
        .store()
        .get(&key)
        .await
        .map_err(|e| {
            error!("Failed to read blob {}: {}", key, e);
            ApiError::Internal(e.to_string())
        })?
        .ok_or_else(|| ApiError::NotFound("file not found".into()))?;

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}
