//! Database row types. These map directly to SQLite rows and stay
//! independent of the lumo-types API models.

use anyhow::{Result, anyhow};
use lumo_types::models::{Profile, Role};

use crate::parse_timestamp;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub display_name: String,
    pub picture: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn to_profile(&self) -> Result<Profile> {
        let role: Role = self.role.parse().map_err(|e: String| anyhow!(e))?;
        Ok(Profile {
            id: self.id.parse()?,
            username: self.username.clone(),
            role,
            display_name: self.display_name.clone(),
            picture: self.picture.clone(),
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// A raw JSON document with its bookkeeping columns.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub collection: String,
    pub id: String,
    pub data: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}
