use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use lumo_types::api::{Claims, StartConversationRequest, StartConversationResponse};

use crate::error::ApiError;
use crate::profiles::load_user;
use crate::state::{AppState, run_db};

/// POST /conversations: open (or reuse) the conversation between the caller
/// and `user_id`. 201 when created, 200 when it already existed.
pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.user_id == claims.sub {
        return Err(ApiError::BadRequest("cannot start a conversation with yourself".into()));
    }

    let me = load_user(&state, claims.sub)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    let other = load_user(&state, req.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    let (a, b) = (me.as_participant(), other.as_participant());
    let (id, created) = run_db(&state, move |db| db.get_or_create_conversation(&a, &b)).await?;

    let status = if created {
        info!("Conversation {} started by {}", id, claims.username);
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(StartConversationResponse { id, created })))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let conversations = run_db(&state, move |db| db.list_conversations_for(user_id)).await?;
    Ok(Json(conversations))
}
