use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

/// Failures of the dual-tier session store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key not found")]
    NotFound,

    #[error("Invalid time-to-live for key {0}")]
    InvalidTtl(String),

    #[error("Durable store error: {0}")]
    Durable(anyhow::Error),

    #[error("Background worker unavailable: {0}")]
    WorkerUnavailable(String),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unsupported recovery method: {0}")]
    UnsupportedMethod(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid recovery code")]
    InvalidCode,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Failed to sign recovery token: {0}")]
    Signing(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{service} call failed: {source}")]
    Downstream {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{call} timed out after {after:?}")]
    Timeout { call: &'static str, after: Duration },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn downstream(service: &'static str, source: anyhow::Error) -> Self {
        ServiceError::Downstream { service, source }
    }

    /// Whether the caller sent something unusable, as opposed to a failure
    /// on our side or downstream.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::UnsupportedMethod(_)
                | ServiceError::UserNotFound
                | ServiceError::InvalidCode
                | ServiceError::InvalidToken
                | ServiceError::TokenExpired
                | ServiceError::ValidationError(_)
        )
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::UnsupportedMethod(m) => {
                AppError::BadRequest(anyhow::anyhow!("Unsupported recovery method: {}", m))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::InvalidCode => {
                AppError::BadRequest(anyhow::anyhow!("Invalid recovery code"))
            }
            ServiceError::InvalidToken => AppError::BadRequest(anyhow::anyhow!("Invalid token")),
            ServiceError::TokenExpired => AppError::BadRequest(anyhow::anyhow!("Token expired")),
            ServiceError::ValidationError(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            other => {
                tracing::error!(error = %other, "Request failed");
                AppError::InternalError(anyhow::anyhow!("Internal server error"))
            }
        }
    }
}
