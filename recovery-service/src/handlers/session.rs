use service_core::{
    axum::{extract::State, http::StatusCode, Json},
    error::AppError,
};

use crate::{
    dtos::{
        session::{CacheSnapshotRequest, SnapshotResponse},
        ErrorResponse,
    },
    middleware::AuthorizedUser,
    models::UserProfile,
    utils::ValidatedJson,
    AppState,
};

/// Cache a permission snapshot for a freshly issued access token
#[utoipa::path(
    post,
    path = "/auth/sessions/permissions",
    request_body = CacheSnapshotRequest,
    responses(
        (status = 201, description = "Snapshot cached", body = SnapshotResponse),
        (status = 400, description = "Access token already expired", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Session"
)]
pub async fn cache_permissions(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CacheSnapshotRequest>,
) -> Result<(StatusCode, Json<SnapshotResponse>), AppError> {
    let snapshot = match req.access_token.as_deref() {
        Some(token) => {
            state
                .permissions
                .cache_for_refresh(&req.user_id, token, req.access_expires_at)
                .await?
        }
        None => {
            state
                .permissions
                .cache_for_login(&req.user_id, req.access_expires_at)
                .await?
        }
    };

    Ok((StatusCode::CREATED, Json(snapshot.into())))
}

/// Drop the permission snapshot of the presented access token
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Session"
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthorizedUser,
) -> Result<StatusCode, AppError> {
    state.permissions.evict(&user.access_token).await?;
    tracing::info!(user_id = %user.snapshot.user_id, "Session permissions evicted");
    Ok(StatusCode::NO_CONTENT)
}

/// Profile of the authenticated user
#[utoipa::path(
    get,
    path = "/auth/profile",
    responses(
        (status = 200, description = "User profile", body = UserProfile),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Session"
)]
pub async fn profile(
    State(state): State<AppState>,
    user: AuthorizedUser,
) -> Result<Json<UserProfile>, AppError> {
    let found = state
        .users
        .get_by_id(&user.snapshot.user_id)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    Ok(Json(found.profile()))
}
