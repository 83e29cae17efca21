//! Permission snapshots cached per user id and per access token.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::models::PermissionSnapshot;
use crate::services::bounded;
use crate::services::error::{ServiceError, StoreError};
use crate::services::permissions::PermissionDirectory;
use crate::services::store::SessionStore;

#[derive(Clone)]
pub struct PermissionCache {
    directory: Arc<dyn PermissionDirectory>,
    store: SessionStore,
    call_timeout: Duration,
}

impl PermissionCache {
    pub fn new(
        directory: Arc<dyn PermissionDirectory>,
        store: SessionStore,
        call_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            store,
            call_timeout,
        }
    }

    /// Snapshot taken at login, keyed by the user id.
    pub async fn cache_for_login(
        &self,
        user_id: &str,
        access_expires_at: DateTime<Utc>,
    ) -> Result<PermissionSnapshot, ServiceError> {
        self.capture(user_id, user_id, access_expires_at).await
    }

    /// Snapshot taken at refresh, keyed by the new access token.
    pub async fn cache_for_refresh(
        &self,
        user_id: &str,
        access_token: &str,
        access_expires_at: DateTime<Utc>,
    ) -> Result<PermissionSnapshot, ServiceError> {
        self.capture(user_id, access_token, access_expires_at).await
    }

    async fn capture(
        &self,
        user_id: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PermissionSnapshot, ServiceError> {
        let ttl = (expires_at - Utc::now())
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .ok_or_else(|| ServiceError::ValidationError("Access token already expired".into()))?;

        let directory = &self.directory;
        let set = bounded("permission-directory", self.call_timeout, async {
            directory
                .get_permissions(user_id)
                .await
                .map_err(|e| ServiceError::downstream("permission-directory", e))
        })
        .await?;

        let snapshot = PermissionSnapshot::new(user_id.to_string(), set);
        self.store.set(key, &snapshot.to_bytes()?, ttl).await?;

        tracing::debug!(
            user_id,
            scopes = snapshot.scopes.len(),
            permissions = snapshot.permissions.len(),
            "Permission snapshot cached"
        );
        Ok(snapshot)
    }

    /// Cached snapshot under `key`. Misses and unreadable entries are `None`.
    pub async fn lookup(&self, key: &str) -> Result<Option<PermissionSnapshot>, ServiceError> {
        match self.store.get(key).await {
            Ok(bytes) => match PermissionSnapshot::from_bytes(&bytes) {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable permission snapshot");
                    Ok(None)
                }
            },
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the snapshot under `key` (logout).
    pub async fn evict(&self, key: &str) -> Result<(), ServiceError> {
        self.store.delete(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Permission, PermissionSet};
    use crate::services::background::BackgroundTasks;
    use crate::services::cache::MockCache;
    use crate::services::durable::MockDurableStore;
    use crate::services::permissions::MockPermissionDirectory;

    fn cache() -> (PermissionCache, Arc<MockPermissionDirectory>, Arc<MockCache>) {
        let directory = Arc::new(MockPermissionDirectory::new());
        directory.grant(
            "user-1",
            PermissionSet {
                scopes: vec![],
                permissions: vec![Permission {
                    resource: "profile".to_string(),
                    action: "read".to_string(),
                }],
            },
        );
        let mock_cache = Arc::new(MockCache::new());
        let store = SessionStore::new(
            mock_cache.clone(),
            Arc::new(MockDurableStore::new()),
            BackgroundTasks::new(2, 16),
        );
        (
            PermissionCache::new(directory.clone(), store, Duration::from_secs(1)),
            directory,
            mock_cache,
        )
    }

    #[tokio::test]
    async fn test_login_caches_under_user_id() {
        let (cache, _, _) = cache();
        cache
            .cache_for_login("user-1", Utc::now() + chrono::Duration::minutes(10))
            .await
            .unwrap();

        let snapshot = cache.lookup("user-1").await.unwrap().unwrap();
        assert!(snapshot.allows("profile", "read"));
        assert!(!snapshot.allows("profile", "delete"));
    }

    #[tokio::test]
    async fn test_refresh_caches_under_access_token_and_evicts() {
        let (cache, _, _) = cache();
        cache
            .cache_for_refresh("user-1", "access-abc", Utc::now() + chrono::Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(
            cache.lookup("access-abc").await.unwrap().unwrap().user_id,
            "user-1"
        );
        cache.evict("access-abc").await.unwrap();
        assert!(cache.lookup("access-abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_caches_nothing() {
        let (cache, directory, mock_cache) = cache();
        let err = cache
            .cache_for_login("user-1", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::ValidationError(_)));
        assert_eq!(directory.call_count(), 0);
        assert!(mock_cache.is_empty());
    }
}
