//! Read-only directory rows owned by the surrounding platform.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserDbModel {
    pub id: String,
    pub organization_id: String,
    pub display_name: String,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl UserDbModel {
    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    pub fn has_phone(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventDbModel {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    pub start_time: i64,
    pub status: String,
    pub team_id: Option<String>,
    pub target_user_ids: String,
    pub target_roles: String,
    pub target_program_ids: String,
    pub target_division_ids: String,
}

impl EventDbModel {
    pub fn is_cancelled(&self) -> bool {
        self.status.eq_ignore_ascii_case("cancelled")
    }

    /// Decode one of the JSON list columns; malformed lists read as empty.
    pub fn list(raw: &str) -> Vec<String> {
        serde_json::from_str(raw).unwrap_or_default()
    }
}
