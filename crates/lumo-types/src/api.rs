use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DeliveryFile, Role};

// -- JWT Claims --

/// JWT claims issued at login and checked by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub token: String,
}

// -- Profiles --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub picture: Option<String>,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartConversationRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartConversationResponse {
    pub id: String,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: String,
}

// -- Orders --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub creator_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount_cents: i64,
    pub currency: String,
}

// -- Deliveries --

#[derive(Debug, Serialize, Deserialize)]
pub struct FailedUpload {
    pub index: usize,
    pub name: String,
    pub error: String,
}

/// Body returned when some files of a delivery did not upload.
/// Files in `uploaded` stay in storage.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadFailureResponse {
    pub error: String,
    pub uploaded: Vec<DeliveryFile>,
    pub failed: Vec<FailedUpload>,
}

// -- Intake --

#[derive(Debug, Serialize, Deserialize)]
pub struct IntakeResponse {
    pub id: String,
}
