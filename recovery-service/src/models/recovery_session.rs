//! Recovery session model - one outstanding password recovery attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// How the user asked to receive the recovery credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMethod {
    /// Six-digit numeric code.
    Code,
    /// Signed, expiring token delivered as a reset link.
    Token,
}

impl RecoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryMethod::Code => "code",
            RecoveryMethod::Token => "token",
        }
    }
}

impl fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "code" => Ok(RecoveryMethod::Code),
            "token" => Ok(RecoveryMethod::Token),
            _ => Err(format!("Unsupported recovery method: {}", s)),
        }
    }
}

/// Outstanding recovery attempt, stored in both tiers under [`RecoverySession::key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySession {
    pub credential: String,
    pub user_id: String,
    pub kind: RecoveryMethod,
    pub channel: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RecoverySession {
    pub fn new(
        credential: String,
        user_id: String,
        kind: RecoveryMethod,
        channel: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            credential,
            user_id,
            kind,
            channel,
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Store key for a credential.
    ///
    /// Codes live in a 6-digit space and are namespaced by user id; tokens are
    /// globally unique and used as-is.
    pub fn key_for(kind: RecoveryMethod, credential: &str, user_id: &str) -> String {
        match kind {
            RecoveryMethod::Code => format!("{}:{}", credential, user_id),
            RecoveryMethod::Token => credential.to_string(),
        }
    }

    pub fn key(&self) -> String {
        Self::key_for(self.kind, &self.credential, &self.user_id)
    }

    /// Remaining lifetime, or zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).max(Duration::zero())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether this session authorizes `credential` for `user_id`.
    pub fn matches(&self, kind: RecoveryMethod, credential: &str, user_id: &str) -> bool {
        self.kind == kind
            && self.credential == credential
            && self.user_id == user_id
            && !self.is_expired()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("code".parse::<RecoveryMethod>(), Ok(RecoveryMethod::Code));
        assert_eq!(" TOKEN ".parse::<RecoveryMethod>(), Ok(RecoveryMethod::Token));
        assert!("".parse::<RecoveryMethod>().is_err());
        assert!("sms".parse::<RecoveryMethod>().is_err());
    }

    #[test]
    fn test_code_keys_are_namespaced_by_user() {
        let a = RecoverySession::key_for(RecoveryMethod::Code, "123456", "user-a");
        let b = RecoverySession::key_for(RecoveryMethod::Code, "123456", "user-b");
        assert_eq!(a, "123456:user-a");
        assert_ne!(a, b);

        let token = RecoverySession::key_for(RecoveryMethod::Token, "eyJ.abc.def", "user-a");
        assert_eq!(token, "eyJ.abc.def");
    }

    #[test]
    fn test_matches_checks_owner_kind_and_expiry() {
        let session = RecoverySession::new(
            "123456".to_string(),
            "user-a".to_string(),
            RecoveryMethod::Code,
            "web".to_string(),
            Utc::now() + Duration::minutes(5),
        );
        assert!(session.matches(RecoveryMethod::Code, "123456", "user-a"));
        assert!(!session.matches(RecoveryMethod::Code, "123456", "user-b"));
        assert!(!session.matches(RecoveryMethod::Token, "123456", "user-a"));
        assert!(!session.matches(RecoveryMethod::Code, "654321", "user-a"));

        let expired = RecoverySession {
            expires_at: Utc::now() - Duration::seconds(1),
            ..session
        };
        assert!(!expired.matches(RecoveryMethod::Code, "123456", "user-a"));
        assert_eq!(expired.remaining(), Duration::zero());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let session = RecoverySession::new(
            "tok".to_string(),
            "user-a".to_string(),
            RecoveryMethod::Token,
            "ios".to_string(),
            Utc::now() + Duration::minutes(5),
        );
        let bytes = session.to_bytes().unwrap();
        assert_eq!(RecoverySession::from_bytes(&bytes).unwrap(), session);
    }
}
