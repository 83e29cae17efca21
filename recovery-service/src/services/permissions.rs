//! Permission directory client.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::PermissionSet;

#[async_trait]
pub trait PermissionDirectory: Send + Sync {
    async fn get_permissions(&self, user_id: &str) -> Result<PermissionSet, anyhow::Error>;
}

#[derive(Clone)]
pub struct HttpPermissionDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPermissionDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build permission client: {}", e))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PermissionDirectory for HttpPermissionDirectory {
    async fn get_permissions(&self, user_id: &str) -> Result<PermissionSet, anyhow::Error> {
        let response = self
            .http
            .get(format!("{}/users/{}/permissions", self.base_url, user_id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "Permission lookup for {} returned {}",
                user_id,
                status
            ));
        }

        Ok(response.json::<PermissionSet>().await?)
    }
}

/// Fixed permission sets for tests; unknown users get an empty set.
#[derive(Default)]
pub struct MockPermissionDirectory {
    sets: Mutex<HashMap<String, PermissionSet>>,
    calls: AtomicUsize,
}

impl MockPermissionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user_id: &str, set: PermissionSet) {
        if let Ok(mut sets) = self.sets.lock() {
            sets.insert(user_id.to_string(), set);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionDirectory for MockPermissionDirectory {
    async fn get_permissions(&self, user_id: &str) -> Result<PermissionSet, anyhow::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .sets
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock permission mutex poisoned: {}", e))?
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}
