//! Durable tier of the session store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// One persisted key/value pair with an absolute expiry.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct DurableRecord {
    pub record_key: String,
    pub payload: Vec<u8>,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl DurableRecord {
    pub fn new(key: &str, payload: &[u8], expiry_utc: DateTime<Utc>) -> Self {
        Self {
            record_key: key.to_string(),
            payload: payload.to_vec(),
            expiry_utc,
            created_utc: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_utc <= Utc::now()
    }
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn upsert(&self, record: &DurableRecord) -> Result<(), anyhow::Error>;

    /// Unexpired record for `key`, if any.
    async fn find_alive(&self, key: &str) -> Result<Option<DurableRecord>, anyhow::Error>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;

    /// Remove every expired record, returning how many went.
    async fn purge_expired(&self) -> Result<u64, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// PostgreSQL-backed durable store over the `session_records` table.
#[derive(Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn upsert(&self, record: &DurableRecord) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO session_records (record_key, payload, expiry_utc, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (record_key) DO UPDATE
            SET payload = EXCLUDED.payload,
                expiry_utc = EXCLUDED.expiry_utc,
                created_utc = EXCLUDED.created_utc
            "#,
        )
        .bind(&record.record_key)
        .bind(&record.payload)
        .bind(record.expiry_utc)
        .bind(record.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to upsert session record: {}", e))?;
        Ok(())
    }

    async fn find_alive(&self, key: &str) -> Result<Option<DurableRecord>, anyhow::Error> {
        sqlx::query_as::<_, DurableRecord>(
            r#"
            SELECT record_key, payload, expiry_utc, created_utc
            FROM session_records
            WHERE record_key = $1 AND expiry_utc > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load session record: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        sqlx::query("DELETE FROM session_records WHERE record_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete session record: {}", e))?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM session_records WHERE expiry_utc <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to purge session records: {}", e))?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        crate::db::health_check(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database health check failed: {}", e))
    }
}

/// In-memory durable store with switchable failures.
#[derive(Default)]
pub struct MockDurableStore {
    records: Mutex<HashMap<String, DurableRecord>>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    upserts: AtomicUsize,
    deletes: AtomicUsize,
}

impl MockDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Stored record regardless of expiry.
    pub fn peek(&self, key: &str) -> Option<DurableRecord> {
        self.records.lock().ok()?.get(key).cloned()
    }

    pub fn insert_raw(&self, record: DurableRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.record_key.clone(), record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for MockDurableStore {
    async fn upsert(&self, record: &DurableRecord) -> Result<(), anyhow::Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock durable write failure"));
        }
        self.records
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock durable mutex poisoned: {}", e))?
            .insert(record.record_key.clone(), record.clone());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_alive(&self, key: &str) -> Result<Option<DurableRecord>, anyhow::Error> {
        let records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock durable mutex poisoned: {}", e))?;
        Ok(records.get(key).filter(|r| !r.is_expired()).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock durable delete failure"));
        }
        self.records
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock durable mutex poisoned: {}", e))?
            .remove(key);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, anyhow::Error> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock durable mutex poisoned: {}", e))?;
        let before = records.len();
        records.retain(|_, r| !r.is_expired());
        Ok((before - records.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
