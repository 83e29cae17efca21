//! Dual-tier session store.
//!
//! The cache is the only tier on the read path. Every write also lands in the
//! durable tier: in the background when the cache accepted it, inline when
//! the cache failed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::services::background::BackgroundTasks;
use crate::services::cache::CacheBackend;
use crate::services::durable::{DurableRecord, DurableStore};
use crate::services::error::StoreError;
use crate::services::metrics;

#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn CacheBackend>,
    durable: Arc<dyn DurableStore>,
    tasks: BackgroundTasks,
}

impl SessionStore {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        durable: Arc<dyn DurableStore>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            cache,
            durable,
            tasks,
        }
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl(key.to_string()));
        }
        let ttl_chrono =
            chrono::Duration::from_std(ttl).map_err(|_| StoreError::InvalidTtl(key.to_string()))?;
        let record = DurableRecord::new(key, value, chrono::Utc::now() + ttl_chrono);
        let durable = self.durable.clone();

        match self.cache.set(key, value, ttl).await {
            Ok(()) => {
                self.tasks.spawn(key, "durable_upsert", async move {
                    durable.upsert(&record).await
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache write failed, persisting to durable store");
                metrics::record_fallback_write("set");
                self.tasks
                    .run(key, "durable_upsert", async move { durable.upsert(&record).await })
                    .await
            }
        }
    }

    /// Cache-only read. Misses and cache errors both surface as `NotFound`.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        match self.cache.get(key).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(StoreError::NotFound),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                Err(StoreError::NotFound)
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let durable = self.durable.clone();
        let owned_key = key.to_string();

        match self.cache.delete(key).await {
            Ok(()) => {
                // A dropped delete would leave a live durable copy behind.
                self.tasks
                    .enqueue(key, "durable_delete", async move {
                        durable.delete(&owned_key).await
                    })
                    .await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache delete failed, deleting from durable store");
                metrics::record_fallback_write("delete");
                self.tasks
                    .run(key, "durable_delete", async move {
                        durable.delete(&owned_key).await
                    })
                    .await
            }
        }
    }

    /// Unexpired durable copy of `key`. Not used on the request hot path.
    ///
    /// Read through the key's lane, so writes and deletes already queued for
    /// `key` are applied first.
    pub async fn get_persisted(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let durable = self.durable.clone();
        let owned_key = key.to_string();
        let (found_tx, found_rx) = oneshot::channel();

        self.tasks
            .run(key, "durable_read", async move {
                let record = durable.find_alive(&owned_key).await?;
                let _ = found_tx.send(record.map(|r| r.payload));
                Ok(())
            })
            .await?;

        found_rx
            .await
            .map_err(|_| StoreError::WorkerUnavailable("durable_read".to_string()))
    }

    /// Queue a purge of expired durable records.
    pub fn sweep_expired(&self) {
        let durable = self.durable.clone();
        self.tasks.spawn("session-sweep", "purge_expired", async move {
            let removed = durable.purge_expired().await?;
            if removed > 0 {
                tracing::info!(removed, "Purged expired session records");
            }
            Ok(())
        });
    }

    /// Wait for all background durable work queued so far.
    pub async fn flush(&self) {
        self.tasks.flush().await;
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.cache.health_check().await?;
        self.durable.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MockCache;
    use crate::services::durable::MockDurableStore;

    fn store() -> (SessionStore, Arc<MockCache>, Arc<MockDurableStore>) {
        let cache = Arc::new(MockCache::new());
        let durable = Arc::new(MockDurableStore::new());
        let store = SessionStore::new(cache.clone(), durable.clone(), BackgroundTasks::new(4, 64));
        (store, cache, durable)
    }

    #[tokio::test]
    async fn test_set_writes_cache_and_eventually_durable() {
        let (store, cache, durable) = store();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.peek("k"), Some(b"v".to_vec()));
        store.flush().await;
        assert_eq!(durable.peek("k").unwrap().payload, b"v");
    }

    #[tokio::test]
    async fn test_set_falls_back_synchronously_when_cache_down() {
        let (store, cache, durable) = store();
        cache.fail_writes(true);

        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        // No flush: the fallback write completed before set returned.
        assert!(durable.peek("k").is_some());
        assert!(cache.peek("k").is_none());
    }

    #[tokio::test]
    async fn test_set_reports_durable_failure_on_fallback() {
        let (store, cache, durable) = store();
        cache.fail_writes(true);
        durable.fail_writes(true);

        let err = store.set("k", b"v", Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, StoreError::Durable(_)));
    }

    #[tokio::test]
    async fn test_async_durable_failure_is_not_propagated() {
        let (store, _cache, durable) = store();
        durable.fail_writes(true);

        assert!(store.set("k", b"v", Duration::from_secs(60)).await.is_ok());
        store.flush().await;
        assert!(durable.peek("k").is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let (store, cache, _) = store();
        let err = store.set("k", b"v", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTtl(_)));
        assert_eq!(cache.write_count(), 0);
    }

    #[tokio::test]
    async fn test_get_is_cache_only() {
        let (store, cache, durable) = store();
        durable.insert_raw(DurableRecord::new(
            "k",
            b"durable",
            chrono::Utc::now() + chrono::Duration::minutes(5),
        ));
        assert!(matches!(store.get("k").await, Err(StoreError::NotFound)));

        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v");

        cache.fail_reads(true);
        assert!(matches!(store.get("k").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_after_set_clears_both_tiers() {
        let (store, cache, durable) = store();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        store.delete("k").await.unwrap();
        store.flush().await;

        assert!(cache.peek("k").is_none());
        assert!(durable.peek("k").is_none());
        assert!(store.get_persisted("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_ok() {
        let (store, _, durable) = store();
        assert!(store.delete("never-written").await.is_ok());
        store.flush().await;
        assert!(durable.is_empty());
    }

    #[tokio::test]
    async fn test_delete_falls_back_when_cache_down() {
        let (store, cache, durable) = store();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        store.flush().await;

        cache.fail_deletes(true);
        store.delete("k").await.unwrap();
        assert!(durable.peek("k").is_none());

        durable.fail_deletes(true);
        assert!(store.delete("k").await.is_err());
    }

    #[tokio::test]
    async fn test_persisted_read_sees_pending_delete() {
        let (store, _, durable) = store();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        store.flush().await;

        store.delete("k").await.unwrap();
        // No flush: the read queues behind the delete on the same lane.
        assert!(store.get_persisted("k").await.unwrap().is_none());
        assert!(durable.peek("k").is_none());
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_records() {
        let (store, _, durable) = store();
        durable.insert_raw(DurableRecord::new(
            "old",
            b"",
            chrono::Utc::now() - chrono::Duration::seconds(1),
        ));
        store.sweep_expired();
        store.flush().await;
        assert!(durable.peek("old").is_none());
    }
}
