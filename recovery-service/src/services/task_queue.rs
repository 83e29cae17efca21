//! Mail task queue.
//!
//! Tasks are stored as `task:{id}` with their JSON payload and the id is
//! pushed onto `queue:{name}` for the mail worker to pop.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::NotificationPayload;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Queue a notification and return its task id.
    async fn submit(&self, payload: &NotificationPayload) -> Result<String, anyhow::Error>;

    /// Withdraw a queued task. Cancelling an unknown id is not an error.
    async fn cancel(&self, task_id: &str) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisTaskQueue {
    manager: ConnectionManager,
    queue_name: String,
}

impl RedisTaskQueue {
    pub fn new(manager: ConnectionManager, queue_name: &str) -> Self {
        Self {
            manager,
            queue_name: queue_name.to_string(),
        }
    }

    fn queue_key(&self) -> String {
        format!("queue:{}", self.queue_name)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn submit(&self, payload: &NotificationPayload) -> Result<String, anyhow::Error> {
        let task_id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(payload)?;
        let mut conn = self.manager.clone();

        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(format!("task:{}", task_id))
            .arg(body)
            .ignore()
            .cmd("LPUSH")
            .arg(self.queue_key())
            .arg(&task_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to enqueue task: {}", e))?;

        tracing::debug!(task_id = %task_id, queue = %self.queue_name, "Task enqueued");
        Ok(task_id)
    }

    async fn cancel(&self, task_id: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();

        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.queue_key())
            .arg(0)
            .arg(task_id)
            .ignore()
            .cmd("DEL")
            .arg(format!("task:{}", task_id))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to cancel task {}: {}", task_id, e))?;

        tracing::debug!(task_id = %task_id, queue = %self.queue_name, "Task cancelled");
        Ok(())
    }
}

/// In-memory queue for tests.
#[derive(Default)]
pub struct MockTaskQueue {
    queued: Mutex<Vec<(String, NotificationPayload)>>,
    cancelled: Mutex<Vec<(String, NotificationPayload)>>,
    submissions: Mutex<usize>,
    fail_submit: AtomicBool,
    fail_cancel: AtomicBool,
}

impl MockTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    /// Tasks still queued.
    pub fn queued(&self) -> Vec<(String, NotificationPayload)> {
        self.queued.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// Tasks withdrawn by `cancel`, with the payload they carried.
    pub fn cancelled(&self) -> Vec<(String, NotificationPayload)> {
        self.cancelled.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Successful submissions, including ones later cancelled.
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl TaskQueue for MockTaskQueue {
    async fn submit(&self, payload: &NotificationPayload) -> Result<String, anyhow::Error> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock queue unavailable"));
        }
        let task_id = Uuid::new_v4().to_string();
        self.queued
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock queue mutex poisoned: {}", e))?
            .push((task_id.clone(), payload.clone()));
        if let Ok(mut n) = self.submissions.lock() {
            *n += 1;
        }
        Ok(task_id)
    }

    async fn cancel(&self, task_id: &str) -> Result<(), anyhow::Error> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock queue cancel failure"));
        }
        let mut queued = self
            .queued
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock queue mutex poisoned: {}", e))?;
        let Some(position) = queued.iter().position(|(id, _)| id == task_id) else {
            return Ok(());
        };
        let withdrawn = queued.remove(position);
        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.push(withdrawn);
        }
        Ok(())
    }
}
