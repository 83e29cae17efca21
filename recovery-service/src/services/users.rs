//! User directory lookups.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::models::User;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error>;
    async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, email, full_name, phone, avatar_url, created_utc
            FROM users
            WHERE LOWER(email) = LOWER($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up user by email: {}", e))
    }

    async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, email, full_name, phone, avatar_url, created_utc
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up user by id: {}", e))
    }
}

/// In-memory user directory for tests.
#[derive(Default)]
pub struct MockUserDirectory {
    users: Mutex<Vec<User>>,
    unavailable: AtomicBool,
}

impl MockUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return it.
    pub fn add_user(&self, user_id: &str, email: &str) -> User {
        let user = User {
            user_id: user_id.to_string(),
            email: email.to_string(),
            full_name: Some("Test User".to_string()),
            phone: None,
            avatar_url: None,
            created_utc: Utc::now(),
        };
        if let Ok(mut users) = self.users.lock() {
            users.push(user.clone());
        }
        user
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn find(&self, pred: impl Fn(&User) -> bool) -> Result<Option<User>, anyhow::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock user directory unavailable"));
        }
        let users = self
            .users
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock user directory mutex poisoned: {}", e))?;
        Ok(users.iter().find(|u| pred(u)).cloned())
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        self.find(|u| u.email.eq_ignore_ascii_case(email))
    }

    async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error> {
        self.find(|u| u.user_id == user_id)
    }
}
