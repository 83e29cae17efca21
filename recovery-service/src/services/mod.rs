//! Services layer for recovery-service.
//!
//! Storage tiers, downstream collaborators, the saga executor and the
//! workflows built on them.

pub mod background;
pub mod cache;
pub mod credentials;
pub mod durable;
pub mod error;
pub mod mail_client;
pub mod metrics;
pub mod permission_cache;
pub mod permissions;
pub mod recovery;
pub mod saga;
pub mod store;
pub mod task_queue;
pub mod users;

use std::future::Future;
use std::time::Duration;

pub use background::BackgroundTasks;
pub use cache::{CacheBackend, MockCache, RedisCache};
pub use credentials::{CodeGenerator, RecoveryTokenIssuer};
pub use durable::{DurableRecord, DurableStore, MockDurableStore, PgDurableStore};
pub use error::{ServiceError, StoreError};
pub use mail_client::{
    DeliveryStatusHistory, MailServiceClient, MailTemplates, MockMailService, NotificationHistory,
};
pub use permission_cache::PermissionCache;
pub use permissions::{HttpPermissionDirectory, MockPermissionDirectory, PermissionDirectory};
pub use recovery::{RecoveryCollaborators, RecoveryOutcome, RecoveryService, RecoverySettings};
pub use saga::{Saga, SagaError, SagaState, SagaStep};
pub use store::SessionStore;
pub use task_queue::{MockTaskQueue, RedisTaskQueue, TaskQueue};
pub use users::{MockUserDirectory, PgUserDirectory, UserDirectory};

/// Bound a downstream call; running out of time is a `Timeout` error.
pub(crate) async fn bounded<T>(
    call: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| ServiceError::Timeout { call, after })?
}
