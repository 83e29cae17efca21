use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{Permission, PermissionSnapshot, Scope};

/// Sent by the login/refresh flow once it has minted an access token.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CacheSnapshotRequest {
    #[validate(length(min = 1))]
    pub user_id: String,
    /// Present on refresh: the snapshot is keyed by this token instead of the user id.
    pub access_token: Option<String>,
    pub access_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SnapshotResponse {
    pub user_id: String,
    pub scopes: Vec<Scope>,
    pub permissions: Vec<Permission>,
    pub captured_at: DateTime<Utc>,
}

impl From<PermissionSnapshot> for SnapshotResponse {
    fn from(snapshot: PermissionSnapshot) -> Self {
        Self {
            user_id: snapshot.user_id,
            scopes: snapshot.scopes,
            permissions: snapshot.permissions,
            captured_at: snapshot.captured_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AuthorizeRequest {
    #[validate(length(min = 1))]
    #[schema(example = "profile")]
    pub resource: String,
    #[validate(length(min = 1))]
    #[schema(example = "read")]
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeResponse {
    pub allowed: bool,
}
