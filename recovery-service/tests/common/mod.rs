//! Shared setup for recovery-service integration tests.
//!
//! Every backend and collaborator is an in-memory mock, so the tests need no
//! running Redis, PostgreSQL or mail service.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use recovery_service::{
    build_router,
    config::{
        BackgroundConfig, DatabaseConfig, DownstreamConfig, Environment, RecoveryConfig,
        RecoveryPolicyConfig, RedisConfig, TimeoutConfig,
    },
    services::{
        BackgroundTasks, MockCache, MockDurableStore, MockMailService, MockPermissionDirectory,
        MockTaskQueue, MockUserDirectory, PermissionCache, RecoveryCollaborators, RecoveryService,
        RecoverySettings, RecoveryTokenIssuer, SessionStore,
    },
    AppState,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789";
pub const TEST_EMAIL: &str = "a@x.com";
pub const TEST_USER_ID: &str = "user-a";

pub fn test_config() -> RecoveryConfig {
    RecoveryConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "recovery-service".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        recovery: RecoveryPolicyConfig {
            token_secret: TEST_SECRET.to_string(),
            expiry_minutes: 15,
            template_id: "forgot-password".to_string(),
            frontend_url: "https://app.example.com".to_string(),
            queue_name: "mail".to_string(),
        },
        downstream: DownstreamConfig {
            mail_service_url: "http://unused".to_string(),
            permission_service_url: "http://unused".to_string(),
        },
        timeouts: TimeoutConfig {
            auth_call_seconds: 2,
            recovery_step_seconds: 2,
        },
        background: BackgroundConfig {
            workers: 4,
            queue_depth: 256,
            sweep_interval_seconds: 300,
        },
    }
}

pub struct TestApp {
    pub state: AppState,
    pub cache: Arc<MockCache>,
    pub durable: Arc<MockDurableStore>,
    pub queue: Arc<MockTaskQueue>,
    pub mail: Arc<MockMailService>,
    pub users: Arc<MockUserDirectory>,
    pub permission_directory: Arc<MockPermissionDirectory>,
}

impl TestApp {
    pub fn new() -> Self {
        let config = test_config();
        let cache = Arc::new(MockCache::new());
        let durable = Arc::new(MockDurableStore::new());
        let store = SessionStore::new(
            cache.clone(),
            durable.clone(),
            BackgroundTasks::new(config.background.workers, config.background.queue_depth),
        );

        let users = Arc::new(MockUserDirectory::new());
        users.add_user(TEST_USER_ID, TEST_EMAIL);

        let queue = Arc::new(MockTaskQueue::new());
        let mail = Arc::new(MockMailService::with_default_template());
        let permission_directory = Arc::new(MockPermissionDirectory::new());

        let recovery = RecoveryService::new(
            RecoveryCollaborators {
                users: users.clone(),
                store: store.clone(),
                queue: queue.clone(),
                templates: mail.clone(),
                history: mail.clone(),
                statuses: mail.clone(),
                tokens: RecoveryTokenIssuer::from_config(&config.recovery),
            },
            RecoverySettings::from_config(&config),
        );
        let permissions = PermissionCache::new(
            permission_directory.clone(),
            store.clone(),
            Duration::from_secs(2),
        );

        let state = AppState {
            config,
            recovery,
            permissions,
            users: users.clone(),
            store,
        };

        Self {
            state,
            cache,
            durable,
            queue,
            mail,
            users,
            permission_directory,
        }
    }

    pub fn recovery(&self) -> &RecoveryService {
        &self.state.recovery
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Wait for detached durable-tier work.
    pub async fn settle(&self) {
        self.state.store.flush().await;
    }

    pub async fn post_json(
        &self,
        uri: &str,
        body: Value,
        bearer: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

