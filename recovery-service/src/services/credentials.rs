use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RecoveryPolicyConfig;
use crate::services::error::ServiceError;

/// Length of codes sent to users.
pub const RECOVERY_CODE_LENGTH: u32 = 6;

const MAX_CODE_LENGTH: u32 = 18;

/// Numeric recovery code generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeGenerator;

impl CodeGenerator {
    /// Uniform decimal string of exactly `length` digits, never zero-led.
    pub fn issue(&self, length: u32) -> Result<String, ServiceError> {
        if length == 0 || length > MAX_CODE_LENGTH {
            return Err(ServiceError::ValidationError(format!(
                "Code length must be between 1 and {}",
                MAX_CODE_LENGTH
            )));
        }

        let min = 10u64.pow(length - 1);
        let max = 10u64.pow(length) - 1;
        let code = rand::thread_rng().gen_range(min..=max);

        Ok(code.to_string())
    }
}

/// Claims carried by a recovery token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Code paired with this token
    pub code: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Token ID
    pub jti: String,
}

/// HS256 signer and verifier for recovery tokens.
#[derive(Clone)]
pub struct RecoveryTokenIssuer {
    keys: Option<(EncodingKey, DecodingKey)>,
}

impl RecoveryTokenIssuer {
    pub fn new(secret: &str) -> Self {
        if secret.is_empty() {
            tracing::warn!("Recovery token issuer created without a signing key");
            return Self { keys: None };
        }

        Self {
            keys: Some((
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            )),
        }
    }

    pub fn from_config(config: &RecoveryPolicyConfig) -> Self {
        Self::new(&config.token_secret)
    }

    pub fn issue(
        &self,
        user_id: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let (encoding_key, _) = self
            .keys
            .as_ref()
            .ok_or_else(|| ServiceError::Signing("signing key unavailable".to_string()))?;

        let claims = RecoveryClaims {
            sub: user_id.to_string(),
            code: code.to_string(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, encoding_key)
            .map_err(|e| ServiceError::Signing(e.to_string()))
    }

    /// Check signature and expiry. No store lookup.
    pub fn verify(&self, token: &str) -> Result<RecoveryClaims, ServiceError> {
        let (_, decoding_key) = self.keys.as_ref().ok_or(ServiceError::InvalidToken)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<RecoveryClaims>(token, decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::TokenExpired,
                _ => ServiceError::InvalidToken,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_codes_have_exact_length() {
        let generator = CodeGenerator;
        for _ in 0..1000 {
            let code = generator.issue(RECOVERY_CODE_LENGTH).unwrap();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
            assert_ne!(code.as_bytes()[0], b'0');
        }
        assert_eq!(generator.issue(1).unwrap().len(), 1);
        assert_eq!(generator.issue(18).unwrap().len(), 18);
    }

    #[test]
    fn test_code_length_bounds() {
        assert!(CodeGenerator.issue(0).is_err());
        assert!(CodeGenerator.issue(19).is_err());
    }

    #[test]
    fn test_codes_are_not_biased() {
        let mut counts = [0usize; 10];
        for _ in 0..2000 {
            for b in CodeGenerator.issue(6).unwrap().bytes().skip(1) {
                counts[(b - b'0') as usize] += 1;
            }
        }
        // 10,000 trailing digits, ~1,000 expected per digit.
        for count in counts {
            assert!((700..1300).contains(&count), "digit count {}", count);
        }
    }

    #[test]
    fn test_token_roundtrip() {
        let issuer = RecoveryTokenIssuer::new("test-secret-test-secret-test-secret");
        let token = issuer
            .issue("user-1", "123456", Utc::now() + Duration::minutes(15))
            .unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.code, "123456");
    }

    #[test]
    fn test_expired_and_tampered_tokens() {
        let issuer = RecoveryTokenIssuer::new("test-secret-test-secret-test-secret");
        let expired = issuer
            .issue("user-1", "123456", Utc::now() - Duration::minutes(1))
            .unwrap();
        assert!(matches!(issuer.verify(&expired), Err(ServiceError::TokenExpired)));

        let other = RecoveryTokenIssuer::new("another-secret-another-secret-xx");
        let foreign = other
            .issue("user-1", "123456", Utc::now() + Duration::minutes(1))
            .unwrap();
        assert!(matches!(issuer.verify(&foreign), Err(ServiceError::InvalidToken)));
    }

    #[test]
    fn test_missing_secret_fails_signing() {
        let issuer = RecoveryTokenIssuer::new("");
        let err = issuer
            .issue("user-1", "123456", Utc::now() + Duration::minutes(1))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Signing(_)));
    }
}
