pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, RecoveryConfig};
use crate::services::{PermissionCache, RecoveryService, SessionStore, UserDirectory};
use service_core::error::AppError;
use std::sync::Arc;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::metrics::metrics,
        handlers::recovery::forgot_password,
        handlers::recovery::check_code,
        handlers::recovery::check_token,
        handlers::session::cache_permissions,
        handlers::session::logout,
        handlers::session::profile,
        handlers::authz::authorize,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::recovery::ForgotPasswordRequest,
            dtos::recovery::ForgotPasswordResponse,
            dtos::recovery::CheckCodeRequest,
            dtos::recovery::CheckTokenRequest,
            dtos::recovery::VerificationResponse,
            dtos::session::CacheSnapshotRequest,
            dtos::session::SnapshotResponse,
            dtos::session::AuthorizeRequest,
            dtos::session::AuthorizeResponse,
            models::UserProfile,
            models::RecoveryMethod,
            models::Scope,
            models::Permission,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Recovery", description = "Password recovery"),
        (name = "Session", description = "Permission snapshots and authorization"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: RecoveryConfig,
    pub recovery: RecoveryService,
    pub permissions: PermissionCache,
    pub users: Arc<dyn UserDirectory>,
    pub store: SessionStore,
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    if state.config.environment == Environment::Dev {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { service_core::axum::Json(ApiDoc::openapi()) }),
        );
    }

    let authenticated = Router::new()
        .route("/auth/profile", get(handlers::profile))
        .route("/auth/authorize", post(handlers::authorize))
        .route("/auth/logout", post(handlers::logout))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::permission_middleware,
        ));

    app.route("/auth/password/forgot", post(handlers::forgot_password))
        .route("/auth/password/check-code", post(handlers::check_code))
        .route("/auth/password/check-token", post(handlers::check_token))
        .route(
            "/auth/sessions/permissions",
            post(handlers::cache_permissions),
        )
        .merge(authenticated)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(service_core::middleware::tracing::REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    service_core::axum::http::Method::GET,
                    service_core::axum::http::Method::POST,
                    service_core::axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    service_core::axum::http::header::AUTHORIZATION,
                    service_core::axum::http::header::CONTENT_TYPE,
                ]),
        )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<service_core::axum::Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Session store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(service_core::axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "cache": "up",
            "durable_store": "up"
        }
    })))
}
