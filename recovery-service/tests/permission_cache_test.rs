mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{TestApp, TEST_EMAIL, TEST_USER_ID};
use recovery_service::models::{Permission, PermissionSet, Scope};
use serde_json::json;

const ACCESS_TOKEN: &str = "access-token-1";

fn grant_profile_read(app: &TestApp) {
    app.permission_directory.grant(
        TEST_USER_ID,
        PermissionSet {
            scopes: vec![Scope {
                resource: "invoice".to_string(),
                resource_data: Some("org-7".to_string()),
                action: "read".to_string(),
            }],
            permissions: vec![Permission {
                resource: "profile".to_string(),
                action: "read".to_string(),
            }],
        },
    );
}

async fn cache_snapshot(app: &TestApp, token: Option<&str>) -> StatusCode {
    let (status, _) = app
        .post_json(
            "/auth/sessions/permissions",
            json!({
                "user_id": TEST_USER_ID,
                "access_token": token,
                "access_expires_at": Utc::now() + Duration::minutes(15),
            }),
            None,
        )
        .await;
    status
}

#[tokio::test]
async fn test_refresh_snapshot_authorizes_requests() {
    let app = TestApp::new();
    grant_profile_read(&app);

    assert_eq!(cache_snapshot(&app, Some(ACCESS_TOKEN)).await, StatusCode::CREATED);

    let (status, body) = app.get("/auth/profile", Some(ACCESS_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], TEST_EMAIL);

    let (status, body) = app
        .post_json(
            "/auth/authorize",
            json!({ "resource": "profile", "action": "read" }),
            Some(ACCESS_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    // Instance-bound scopes do not grant the whole resource.
    let (_, body) = app
        .post_json(
            "/auth/authorize",
            json!({ "resource": "invoice", "action": "read" }),
            Some(ACCESS_TOKEN),
        )
        .await;
    assert_eq!(body["allowed"], false);

    // Served from the cache: only the snapshot capture hit the directory.
    assert_eq!(app.permission_directory.call_count(), 1);
}

#[tokio::test]
async fn test_login_snapshot_keyed_by_user_id() {
    let app = TestApp::new();
    grant_profile_read(&app);

    assert_eq!(cache_snapshot(&app, None).await, StatusCode::CREATED);

    assert!(app.cache.peek(TEST_USER_ID).is_some());
    assert!(app.cache.peek(ACCESS_TOKEN).is_none());
}

#[tokio::test]
async fn test_logout_evicts_snapshot() {
    let app = TestApp::new();
    grant_profile_read(&app);
    cache_snapshot(&app, Some(ACCESS_TOKEN)).await;

    let (status, _) = app
        .post_json("/auth/logout", json!({}), Some(ACCESS_TOKEN))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get("/auth/profile", Some(ACCESS_TOKEN)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.settle().await;
    assert!(app.durable.peek(ACCESS_TOKEN).is_none());
}

#[tokio::test]
async fn test_missing_or_unknown_bearer_is_unauthorized() {
    let app = TestApp::new();

    let (status, _) = app.get("/auth/profile", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/auth/profile", Some("never-cached")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_access_token_is_rejected() {
    let app = TestApp::new();
    grant_profile_read(&app);

    let (status, _) = app
        .post_json(
            "/auth/sessions/permissions",
            json!({
                "user_id": TEST_USER_ID,
                "access_token": ACCESS_TOKEN,
                "access_expires_at": Utc::now() - Duration::seconds(5),
            }),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.cache.peek(ACCESS_TOKEN).is_none());
    assert_eq!(app.permission_directory.call_count(), 0);
}

#[tokio::test]
async fn test_snapshot_survives_cache_outage_on_write() {
    let app = TestApp::new();
    grant_profile_read(&app);
    app.cache.fail_writes(true);

    assert_eq!(cache_snapshot(&app, Some(ACCESS_TOKEN)).await, StatusCode::CREATED);

    // Persisted durably even though the cache rejected it.
    assert!(app.durable.peek(ACCESS_TOKEN).is_some());
}
