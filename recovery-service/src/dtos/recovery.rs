use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::UserProfile;

fn default_channel() -> String {
    "web".to_string()
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    #[schema(example = "user@example.com")]
    pub email: String,
    /// Origin platform, free-form.
    #[serde(default = "default_channel")]
    #[validate(length(min = 1, max = 64))]
    #[schema(example = "web")]
    pub channel: String,
    /// `code` or `token`.
    #[schema(example = "code")]
    pub method: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordResponse {
    pub user: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckCodeRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 18))]
    #[schema(example = "482913")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckTokenRequest {
    #[validate(length(min = 1))]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerificationResponse {
    pub valid: bool,
}
