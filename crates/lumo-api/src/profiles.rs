use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use lumo_types::api::{Claims, UpdateProfileRequest};
use lumo_types::models::Profile;

use crate::error::ApiError;
use crate::state::{AppState, run_db};

const MAX_PICTURE_URL: usize = 2048;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_profile(&state, &claims).await?))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let display_name = req.display_name.map(|n| n.trim().to_string());
    if let Some(name) = &display_name {
        if name.is_empty() || name.chars().count() > 64 {
            return Err(ApiError::BadRequest("display_name must be 1-64 characters".into()));
        }
    }

    let picture = req.picture.map(|p| p.trim().to_string());
    if let Some(url) = &picture {
        let is_http = url.starts_with("https://") || url.starts_with("http://");
        if !is_http || url.len() > MAX_PICTURE_URL {
            return Err(ApiError::BadRequest("picture must be an http(s) URL".into()));
        }
    }

    let id = claims.sub.to_string();
    let updated = run_db(&state, move |db| {
        db.update_profile(&id, display_name.as_deref(), picture.as_deref())
    })
    .await?;
    if !updated {
        return Err(ApiError::NotFound("user not found".into()));
    }

    info!("Profile updated for {}", claims.username);
    Ok(Json(load_profile(&state, &claims).await?))
}

async fn load_profile(state: &AppState, claims: &Claims) -> Result<Profile, ApiError> {
    load_user(state, claims.sub)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))
}

pub(crate) async fn load_user(state: &AppState, user_id: Uuid) -> Result<Option<Profile>, ApiError> {
    let id = user_id.to_string();
    run_db(state, move |db| {
        db.get_user_by_id(&id)?
            .map(|row| row.to_profile())
            .transpose()
    })
    .await
}
