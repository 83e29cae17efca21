//! Bounded pool of background lanes for durable-tier work.
//!
//! Every job carries a routing key. Jobs sharing a key land on the same lane
//! and run in the order they were queued, so a delete issued after a write
//! can never overtake it. Lanes own their futures outright and are not tied
//! to any request's cancellation.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::services::error::StoreError;
use crate::services::metrics;

type JobResult = Result<(), anyhow::Error>;

enum LaneMessage {
    Job {
        name: &'static str,
        key: String,
        task: BoxFuture<'static, JobResult>,
        reply: Option<oneshot::Sender<JobResult>>,
    },
    Barrier(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct BackgroundTasks {
    lanes: Arc<Vec<mpsc::Sender<LaneMessage>>>,
}

impl BackgroundTasks {
    /// Start `workers` lanes, each buffering up to `queue_depth` jobs.
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        let queue_depth = queue_depth.max(1);

        let lanes = (0..workers)
            .map(|lane_id| {
                let (tx, rx) = mpsc::channel(queue_depth);
                tokio::spawn(run_lane(lane_id, rx));
                tx
            })
            .collect::<Vec<_>>();

        tracing::info!(workers, queue_depth, "Background lanes started");

        Self {
            lanes: Arc::new(lanes),
        }
    }

    fn lane_for(&self, key: &str) -> &mpsc::Sender<LaneMessage> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.lanes.len() as u64) as usize;
        &self.lanes[idx]
    }

    /// Queue a detached job. Never blocks; a full lane drops the job.
    pub fn spawn<F>(&self, key: &str, name: &'static str, task: F)
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        let message = LaneMessage::Job {
            name,
            key: key.to_string(),
            task: task.boxed(),
            reply: None,
        };

        match self.lane_for(key).try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(job = name, key, "Background lane full, dropping job");
                metrics::record_background_job("dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(job = name, key, "Background lane closed, dropping job");
                metrics::record_background_job("dropped");
            }
        }
    }

    /// Queue a detached job that must not be lost: on a full lane, wait for
    /// space instead of dropping it. Does not wait for the job to run.
    pub async fn enqueue<F>(&self, key: &str, name: &'static str, task: F)
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        let message = LaneMessage::Job {
            name,
            key: key.to_string(),
            task: task.boxed(),
            reply: None,
        };

        let lane = self.lane_for(key);
        match lane.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::debug!(job = name, key, "Background lane full, waiting for space");
                if lane.send(message).await.is_err() {
                    tracing::warn!(job = name, key, "Background lane closed, dropping job");
                    metrics::record_background_job("dropped");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(job = name, key, "Background lane closed, dropping job");
                metrics::record_background_job("dropped");
            }
        }
    }

    /// Queue a job behind everything already queued for `key` and wait for it.
    pub async fn run<F>(&self, key: &str, name: &'static str, task: F) -> Result<(), StoreError>
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let message = LaneMessage::Job {
            name,
            key: key.to_string(),
            task: task.boxed(),
            reply: Some(reply_tx),
        };

        self.lane_for(key)
            .send(message)
            .await
            .map_err(|_| StoreError::WorkerUnavailable(name.to_string()))?;

        reply_rx
            .await
            .map_err(|_| StoreError::WorkerUnavailable(name.to_string()))?
            .map_err(StoreError::Durable)
    }

    /// Wait until every job queued before this call has finished.
    pub async fn flush(&self) {
        let mut barriers = Vec::with_capacity(self.lanes.len());
        for lane in self.lanes.iter() {
            let (tx, rx) = oneshot::channel();
            if lane.send(LaneMessage::Barrier(tx)).await.is_ok() {
                barriers.push(rx);
            }
        }
        for barrier in barriers {
            let _ = barrier.await;
        }
    }
}

async fn run_lane(lane_id: usize, mut rx: mpsc::Receiver<LaneMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            LaneMessage::Job {
                name,
                key,
                task,
                reply,
            } => {
                let result = match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("background job panicked")),
                };

                match &result {
                    Ok(()) => metrics::record_background_job("succeeded"),
                    Err(e) => {
                        tracing::warn!(lane_id, job = name, key = %key, error = %e, "Background job failed");
                        metrics::record_background_job("failed");
                    }
                }

                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            LaneMessage::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!(lane_id, "Background lane stopped");
}
