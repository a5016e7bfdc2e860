use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use lumo_types::api::{Claims, SendMessageRequest};
use lumo_types::models::Conversation;

use crate::error::ApiError;
use crate::state::{AppState, run_db};

const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: `created_at` and `id` of the oldest message from the
    /// previous page.
    pub before: Option<DateTime<Utc>>,
    pub before_id: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.trim().to_string();
    if text.is_empty() || text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest("text must be 1-4000 characters".into()));
    }

    require_participant(&state, &conversation_id, &claims).await?;

    let sender = claims.sub;
    let message = run_db(&state, move |db| {
        db.post_message(&conversation_id, sender, &text)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_participant(&state, &conversation_id, &claims).await?;

    let limit = query.limit.clamp(1, 200);
    let before = query.before.map(|at| (at, query.before_id));
    let messages = run_db(&state, move |db| {
        db.list_messages(&conversation_id, limit, before)
    })
    .await?;

    Ok(Json(messages))
}

/// Non-participants get the same 404 as a missing conversation.
async fn require_participant(
    state: &AppState,
    conversation_id: &str,
    claims: &Claims,
) -> Result<Conversation, ApiError> {
    let id = conversation_id.to_string();
    let conversation = run_db(state, move |db| db.get_conversation(&id)).await?;
    match conversation {
        Some(c) if c.has_participant(claims.sub) => Ok(c),
        _ => Err(ApiError::NotFound("conversation not found".into())),
    }
}
