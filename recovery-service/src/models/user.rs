//! User model - read-only view of the account directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// User record as stored by the account directory.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Public projection safe to return to clients and embed in mail payloads.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            phone: self.phone.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Public user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    #[schema(example = "3f1c2a8e-3c55-4d3c-9d64-1a4e7b0d5f21")]
    pub user_id: String,
    #[schema(example = "user@example.com")]
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
}
