use service_core::{
    axum::{extract::State, Json},
    error::AppError,
};

use crate::{
    dtos::{
        recovery::{
            CheckCodeRequest, CheckTokenRequest, ForgotPasswordRequest, ForgotPasswordResponse,
            VerificationResponse,
        },
        ErrorResponse,
    },
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Hide which step failed; only client errors keep their message.
fn recovery_error(err: ServiceError) -> AppError {
    if err.is_client_error() {
        return err.into();
    }
    tracing::error!(error = %err, "Password recovery failed");
    AppError::InternalError(anyhow::anyhow!("Password recovery failed"))
}

/// Start password recovery
#[utoipa::path(
    post,
    path = "/auth/password/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Recovery credential issued", body = ForgotPasswordResponse),
        (status = 400, description = "Unsupported recovery method", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Password recovery failed", body = ErrorResponse)
    ),
    tag = "Recovery"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, AppError> {
    let method = req.method.as_deref().unwrap_or_default();

    let outcome = state
        .recovery
        .request_recovery(&req.email, &req.channel, method)
        .await
        .map_err(recovery_error)?;

    Ok(Json(ForgotPasswordResponse {
        user: outcome.user,
        code: outcome.code,
        token: outcome.token,
        message: "Password recovery started".to_string(),
    }))
}

/// Check a recovery code without consuming it
#[utoipa::path(
    post,
    path = "/auth/password/check-code",
    request_body = CheckCodeRequest,
    responses(
        (status = 200, description = "Verification result", body = VerificationResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Recovery"
)]
pub async fn check_code(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CheckCodeRequest>,
) -> Result<Json<VerificationResponse>, AppError> {
    let valid = state
        .recovery
        .verify_code(&req.code, &req.email)
        .await
        .map_err(recovery_error)?;

    Ok(Json(VerificationResponse { valid }))
}

/// Check a recovery token without consuming it
#[utoipa::path(
    post,
    path = "/auth/password/check-token",
    request_body = CheckTokenRequest,
    responses(
        (status = 200, description = "Verification result", body = VerificationResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Recovery"
)]
pub async fn check_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CheckTokenRequest>,
) -> Result<Json<VerificationResponse>, AppError> {
    let valid = match state.recovery.verify_token(&req.token).await {
        Ok(valid) => valid,
        Err(ServiceError::InvalidToken | ServiceError::TokenExpired) => false,
        Err(e) => return Err(recovery_error(e)),
    };

    Ok(Json(VerificationResponse { valid }))
}
