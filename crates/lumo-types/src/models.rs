use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Users --

/// Marketplace side a user signed up as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Creator,
    Brand,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Brand => "brand",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creator" => Ok(Self::Creator),
            "brand" => Ok(Self::Brand),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub display_name: String,
    pub picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn as_participant(&self) -> Participant {
        Participant {
            user_id: self.id,
            name: self.display_name.clone(),
            role: self.role,
            picture: self.picture.clone(),
        }
    }
}

// -- Conversations --

/// Display metadata for one side of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub sender_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Sorted ascending, same order as the key.
    pub participant_ids: Vec<Uuid>,
    pub participants: Vec<Participant>,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participant_ids.contains(&user_id)
    }
}

/// Canonical conversation key for a pair of users.
///
/// The ids are sorted before joining so `(a, b)` and `(b, a)` map to the
/// same conversation.
pub fn conversation_key(a: Uuid, b: Uuid) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}", first, second)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// -- Orders --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Whether an order in `self` may move to `next`.
    ///
    /// `Delivered -> Delivered` is a re-delivery that replaces the latest one.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Delivered)
                | (Delivered, Delivered)
                | (Delivered, Completed)
                | (Pending, Cancelled)
                | (InProgress, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub creator_id: Uuid,
    pub title: String,
    pub description: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.brand_id == user_id || self.creator_id == user_id
    }
}

// -- Deliveries --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFile {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub url: String,
    pub storage_key: String,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub order_id: Uuid,
    pub files: Vec<DeliveryFile>,
    pub note: Option<String>,
    pub links: Vec<String>,
    pub delivered_at: DateTime<Utc>,
    pub status: OrderStatus,
}

// -- Intake --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntakeSource {
    Waitlist,
    Signup,
}

impl IntakeSource {
    /// Collection the entries of this source are appended to.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Waitlist => "waitlist",
            Self::Signup => "signups",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEntry {
    pub city: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeEntry {
    pub source: IntakeSource,
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub trips: Vec<TripEntry>,
    pub created_at: DateTime<Utc>,
}
