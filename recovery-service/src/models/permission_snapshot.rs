//! Permission snapshot - cached authorization state for one access token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Resource-scoped grant, optionally narrowed to a specific resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Scope {
    pub resource: String,
    #[serde(default)]
    pub resource_data: Option<String>,
    pub action: String,
}

/// Plain resource/action grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

/// What the permission directory returns for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Point-in-time copy of a user's grants, read by the authorization
/// middleware without a remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    pub user_id: String,
    pub scopes: Vec<Scope>,
    pub permissions: Vec<Permission>,
    pub captured_at: DateTime<Utc>,
}

fn grants(granted: &str, requested: &str) -> bool {
    granted == "*" || granted == requested
}

impl PermissionSnapshot {
    pub fn new(user_id: String, set: PermissionSet) -> Self {
        Self {
            user_id,
            scopes: set.scopes,
            permissions: set.permissions,
            captured_at: Utc::now(),
        }
    }

    /// Whether any permission or unrestricted scope grants `action` on `resource`.
    pub fn allows(&self, resource: &str, action: &str) -> bool {
        let by_permission = self
            .permissions
            .iter()
            .any(|p| grants(&p.resource, resource) && grants(&p.action, action));

        let by_scope = self.scopes.iter().any(|s| {
            s.resource_data.is_none() && grants(&s.resource, resource) && grants(&s.action, action)
        });

        by_permission || by_scope
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
