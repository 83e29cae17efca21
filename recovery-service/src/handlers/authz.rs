//! Authorization decisions against the cached permission snapshot.

use service_core::{
    axum::Json,
    error::AppError,
};

use crate::{
    dtos::{
        session::{AuthorizeRequest, AuthorizeResponse},
        ErrorResponse,
    },
    middleware::AuthorizedUser,
    utils::ValidatedJson,
};

/// Evaluate a resource/action pair for the bearer token
#[utoipa::path(
    post,
    path = "/auth/authorize",
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Decision", body = AuthorizeResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Session"
)]
pub async fn authorize(
    user: AuthorizedUser,
    ValidatedJson(req): ValidatedJson<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let allowed = user.snapshot.allows(&req.resource, &req.action);

    tracing::debug!(
        user_id = %user.snapshot.user_id,
        resource = %req.resource,
        action = %req.action,
        allowed,
        "Authorization evaluated"
    );

    Ok(Json(AuthorizeResponse { allowed }))
}
