mod common;

use axum::http::StatusCode;
use common::{TestApp, TEST_EMAIL, TEST_USER_ID};
use serde_json::json;

#[tokio::test]
async fn test_health_reports_both_tiers() {
    let app = TestApp::new();

    let (status, body) = app.get("/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["cache"], "up");
    assert_eq!(body["checks"]["durable_store"], "up");
}

#[tokio::test]
async fn test_forgot_password_with_code() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/auth/password/forgot",
            json!({ "email": TEST_EMAIL, "channel": "web", "method": "code" }),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["user_id"], TEST_USER_ID);
    assert_eq!(body["code"].as_str().unwrap().len(), 6);
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn test_forgot_password_defaults_channel() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/auth/password/forgot",
            json!({ "email": TEST_EMAIL, "method": "token" }),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("code").is_none());
    assert!(body["token"].is_string());
}

#[tokio::test]
async fn test_forgot_password_rejects_missing_or_unknown_method() {
    let app = TestApp::new();

    let (status, _) = app
        .post_json("/auth/password/forgot", json!({ "email": TEST_EMAIL }), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post_json(
            "/auth/password/forgot",
            json!({ "email": TEST_EMAIL, "method": "sms" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("sms"));
}

#[tokio::test]
async fn test_forgot_password_unknown_user_is_404() {
    let app = TestApp::new();

    let (status, _) = app
        .post_json(
            "/auth/password/forgot",
            json!({ "email": "nobody@x.com", "method": "code" }),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_forgot_password_validation() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/auth/password/forgot",
            json!({ "email": "not-an-email", "method": "code" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Validation error");

    let (status, _) = app
        .post_json("/auth/password/forgot", json!({ "method": "code" }), None)
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_downstream_failure_is_opaque() {
    let app = TestApp::new();
    app.mail.fail_history_create(true);

    let (status, body) = app
        .post_json(
            "/auth/password/forgot",
            json!({ "email": TEST_EMAIL, "method": "code" }),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Password recovery failed");
}

#[tokio::test]
async fn test_check_code_round_trip() {
    let app = TestApp::new();

    let (_, body) = app
        .post_json(
            "/auth/password/forgot",
            json!({ "email": TEST_EMAIL, "method": "code" }),
            None,
        )
        .await;
    let code = body["code"].as_str().unwrap().to_string();

    let (status, body) = app
        .post_json(
            "/auth/password/check-code",
            json!({ "email": TEST_EMAIL, "code": code }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let wrong = if code == "000000" { "111111" } else { "000000" };
    let (status, body) = app
        .post_json(
            "/auth/password/check-code",
            json!({ "email": TEST_EMAIL, "code": wrong }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_check_token_rejects_garbage() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/auth/password/check-token",
            json!({ "token": "not.a.token" }),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_check_token_round_trip() {
    let app = TestApp::new();

    let (_, body) = app
        .post_json(
            "/auth/password/forgot",
            json!({ "email": TEST_EMAIL, "method": "token" }),
            None,
        )
        .await;
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app
        .post_json("/auth/password/check-token", json!({ "token": token }), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = TestApp::new();

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/auth/password/forgot")
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = tower::util::ServiceExt::oneshot(app.router(), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::new();

    let request = axum::http::Request::builder()
        .uri("/health")
        .header("x-request-id", "req-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::util::ServiceExt::oneshot(app.router(), request)
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = TestApp::new();

    let (status, body) = app.get("/.well-known/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/auth/password/forgot"].is_object());
}
