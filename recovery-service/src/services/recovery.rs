//! Password recovery workflow.
//!
//! A request runs four saga steps: issue a credential, enqueue the mail,
//! record notification history, record the pending delivery status. Any
//! failure unwinds the steps that already ran.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::RecoveryConfig;
use crate::models::{
    DeliveryStatusRecord, MailTemplate, NotificationHistoryRecord, NotificationPayload,
    RecoveryMethod, RecoverySession, User, UserProfile,
};
use crate::services::bounded;
use crate::services::credentials::{CodeGenerator, RecoveryTokenIssuer, RECOVERY_CODE_LENGTH};
use crate::services::error::{ServiceError, StoreError};
use crate::services::mail_client::{DeliveryStatusHistory, MailTemplates, NotificationHistory};
use crate::services::saga::{Saga, SagaError, SagaStep};
use crate::services::store::SessionStore;
use crate::services::task_queue::TaskQueue;
use crate::services::users::UserDirectory;

const WORKFLOW: &str = "forgot_password";

#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub expiry: chrono::Duration,
    pub template_id: String,
    pub frontend_url: String,
    pub auth_timeout: Duration,
    pub step_timeout: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            expiry: chrono::Duration::minutes(15),
            template_id: "forgot-password".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            auth_timeout: Duration::from_secs(3),
            step_timeout: Duration::from_secs(10),
        }
    }
}

impl RecoverySettings {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            expiry: chrono::Duration::minutes(config.recovery.expiry_minutes),
            template_id: config.recovery.template_id.clone(),
            frontend_url: config.recovery.frontend_url.trim_end_matches('/').to_string(),
            auth_timeout: config.timeouts.auth_call(),
            step_timeout: config.timeouts.recovery_step(),
        }
    }
}

/// Everything the workflow talks to.
#[derive(Clone)]
pub struct RecoveryCollaborators {
    pub users: Arc<dyn UserDirectory>,
    pub store: SessionStore,
    pub queue: Arc<dyn TaskQueue>,
    pub templates: Arc<dyn MailTemplates>,
    pub history: Arc<dyn NotificationHistory>,
    pub statuses: Arc<dyn DeliveryStatusHistory>,
    pub tokens: RecoveryTokenIssuer,
}

/// Result of a successful recovery request. Exactly one of `code` and
/// `token` is set, matching the requested method.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub user: UserProfile,
    pub code: Option<String>,
    pub token: Option<String>,
}

#[derive(Clone)]
pub struct RecoveryService {
    deps: RecoveryCollaborators,
    codes: CodeGenerator,
    settings: RecoverySettings,
}

/// Key of the pointer to a user's newest session of one kind.
fn latest_session_key(kind: RecoveryMethod, user_id: &str) -> String {
    format!("recovery:latest:{}:{}", kind, user_id)
}

impl RecoveryService {
    pub fn new(deps: RecoveryCollaborators, settings: RecoverySettings) -> Self {
        Self {
            deps,
            codes: CodeGenerator,
            settings,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.deps.store
    }

    /// Run the recovery workflow for `email`.
    ///
    /// The run is moved onto its own task, so dropping the returned future
    /// does not interrupt a step or its compensations.
    pub async fn request_recovery(
        &self,
        email: &str,
        channel: &str,
        method: &str,
    ) -> Result<RecoveryOutcome, ServiceError> {
        let method: RecoveryMethod = method
            .parse()
            .map_err(|_| ServiceError::UnsupportedMethod(method.to_string()))?;

        let template = {
            let templates = self.deps.templates.clone();
            let template_id = self.settings.template_id.clone();
            bounded("mail-templates", self.settings.step_timeout, async move {
                templates
                    .get(&template_id)
                    .await
                    .map_err(|e| ServiceError::downstream("mail-templates", e))
            })
            .await?
        };

        let run = RecoveryRun {
            svc: self.clone(),
            saga_id: format!("forgot-password-{}-{}", email, Uuid::new_v4()),
            email: email.to_string(),
            channel: channel.to_string(),
            method,
            template,
            user: None,
            code: None,
            token: None,
            session_key: None,
            session_ttl: None,
            task_id: None,
            payload: None,
            history_id: None,
        };

        tokio::spawn(run.execute())
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Recovery run aborted: {}", e)))?
    }

    async fn find_user(&self, email: &str) -> Result<User, ServiceError> {
        let users = self.deps.users.clone();
        let email = email.to_string();
        bounded("user-directory", self.settings.auth_timeout, async move {
            users
                .get_by_email(&email)
                .await
                .map_err(|e| ServiceError::downstream("user-directory", e))
        })
        .await?
        .ok_or(ServiceError::UserNotFound)
    }

    /// Load a session from the cache, falling back to its durable copy.
    async fn load_session(&self, key: &str) -> Result<Option<RecoverySession>, ServiceError> {
        let store = &self.deps.store;
        let bytes = bounded("session-store", self.settings.step_timeout, async {
            match store.get(key).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(StoreError::NotFound) => Ok(store.get_persisted(key).await?),
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        match RecoverySession::from_bytes(&bytes) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding unreadable recovery session");
                Ok(None)
            }
        }
    }

    async fn delete_session(&self, key: &str) -> Result<(), ServiceError> {
        let store = &self.deps.store;
        bounded("session-store", self.settings.step_timeout, async {
            store.delete(key).await.map_err(ServiceError::from)
        })
        .await
    }

    /// Check a code without consuming it. A missing session is `false`.
    pub async fn verify_code(&self, code: &str, email: &str) -> Result<bool, ServiceError> {
        let user = self.find_user(email).await?;
        let key = RecoverySession::key_for(RecoveryMethod::Code, code, &user.user_id);

        Ok(self
            .load_session(&key)
            .await?
            .is_some_and(|s| s.matches(RecoveryMethod::Code, code, &user.user_id)))
    }

    /// Check a token's signature, expiry and backing session.
    pub async fn verify_token(&self, token: &str) -> Result<bool, ServiceError> {
        let claims = self.deps.tokens.verify(token)?;
        self.token_session_matches(token, &claims.sub).await
    }

    async fn token_session_matches(&self, token: &str, user_id: &str) -> Result<bool, ServiceError> {
        let key = RecoverySession::key_for(RecoveryMethod::Token, token, user_id);

        Ok(self
            .load_session(&key)
            .await?
            .is_some_and(|s| s.matches(RecoveryMethod::Token, token, user_id)))
    }

    /// Verify and delete a code session.
    pub async fn consume_code(&self, code: &str, email: &str) -> Result<UserProfile, ServiceError> {
        let user = self.find_user(email).await?;
        let key = RecoverySession::key_for(RecoveryMethod::Code, code, &user.user_id);

        let valid = self
            .load_session(&key)
            .await?
            .is_some_and(|s| s.matches(RecoveryMethod::Code, code, &user.user_id));
        if !valid {
            return Err(ServiceError::InvalidCode);
        }

        self.delete_session(&key).await?;
        tracing::info!(user_id = %user.user_id, "Recovery code consumed");
        Ok(user.profile())
    }

    /// Verify and delete a token session. Returns the token's user id.
    pub async fn consume_token(&self, token: &str) -> Result<String, ServiceError> {
        let claims = self.deps.tokens.verify(token)?;
        if !self.token_session_matches(token, &claims.sub).await? {
            return Err(ServiceError::InvalidToken);
        }

        let key = RecoverySession::key_for(RecoveryMethod::Token, token, &claims.sub);
        self.delete_session(&key).await?;
        tracing::info!(user_id = %claims.sub, "Recovery token consumed");
        Ok(claims.sub)
    }
}

/// Request-local state threaded through the recovery saga.
pub struct RecoveryRun {
    svc: RecoveryService,
    saga_id: String,
    email: String,
    channel: String,
    method: RecoveryMethod,
    template: MailTemplate,
    user: Option<User>,
    code: Option<String>,
    token: Option<String>,
    session_key: Option<String>,
    session_ttl: Option<Duration>,
    task_id: Option<String>,
    payload: Option<NotificationPayload>,
    history_id: Option<String>,
}

impl RecoveryRun {
    async fn execute(mut self) -> Result<RecoveryOutcome, ServiceError> {
        let mut saga = Saga::new(self.saga_id.clone()).for_workflow(WORKFLOW);
        for step in RecoveryStep::ALL {
            saga.add_step(step)
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        }

        match saga.execute(&mut self).await {
            Ok(()) => {}
            Err(SagaError::StepFailed { error, .. }) => return Err(error),
            Err(SagaError::Sealed(e)) => return Err(ServiceError::Internal(anyhow::anyhow!(e))),
        }

        let user = self
            .user
            .as_ref()
            .map(User::profile)
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Recovery run has no user")))?;

        if let (Some(key), Some(ttl)) = (self.session_key.as_deref(), self.session_ttl) {
            self.supersede_previous(&user.user_id, key, ttl).await;
        }

        tracing::info!(
            saga_id = %self.saga_id,
            user_id = %user.user_id,
            method = %self.method,
            "Recovery credential issued"
        );

        Ok(RecoveryOutcome {
            user,
            code: match self.method {
                RecoveryMethod::Code => self.code.take(),
                RecoveryMethod::Token => None,
            },
            token: self.token.take(),
        })
    }

    fn settings(&self) -> &RecoverySettings {
        &self.svc.settings
    }

    fn missing(&self, what: &str) -> ServiceError {
        ServiceError::Internal(anyhow::anyhow!(
            "{} missing in saga {}",
            what,
            self.saga_id
        ))
    }

    async fn issue_credential(&mut self) -> Result<(), ServiceError> {
        let user = self.svc.find_user(&self.email).await?;

        let code = self.svc.codes.issue(RECOVERY_CODE_LENGTH)?;
        let expires_at = Utc::now() + self.settings().expiry;

        let credential = match self.method {
            RecoveryMethod::Code => code.clone(),
            RecoveryMethod::Token => {
                let token = self.svc.deps.tokens.issue(&user.user_id, &code, expires_at)?;
                self.token = Some(token.clone());
                token
            }
        };

        let session = RecoverySession::new(
            credential,
            user.user_id.clone(),
            self.method,
            self.channel.clone(),
            expires_at,
        );
        let key = session.key();
        let bytes = session.to_bytes()?;
        let ttl = session
            .remaining()
            .to_std()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;

        let store = &self.svc.deps.store;
        bounded("session-store", self.settings().step_timeout, async {
            store.set(&key, &bytes, ttl).await.map_err(ServiceError::from)
        })
        .await?;

        self.code = Some(code);
        self.session_key = Some(key);
        self.session_ttl = Some(ttl);
        self.user = Some(user);
        Ok(())
    }

    /// Drop the user's previous session of this kind and point at the new one.
    /// Runs only once the saga has completed, so a rolled-back run leaves the
    /// previous session valid. Best effort: one active session per user and
    /// kind is not guaranteed.
    async fn supersede_previous(&self, user_id: &str, new_key: &str, ttl: Duration) {
        let store = &self.svc.deps.store;
        let step_timeout = self.settings().step_timeout;
        let pointer = latest_session_key(self.method, user_id);

        let previous = bounded("session-store", step_timeout, async {
            match store.get(&pointer).await {
                Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
                Err(StoreError::NotFound) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await;

        match previous {
            Ok(Some(previous)) if previous != new_key => {
                if let Err(e) = self.svc.delete_session(&previous).await {
                    tracing::warn!(saga_id = %self.saga_id, error = %e, "Failed to drop superseded recovery session");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(saga_id = %self.saga_id, error = %e, "Failed to read latest recovery session");
            }
        }

        let recorded = bounded("session-store", step_timeout, async {
            store
                .set(&pointer, new_key.as_bytes(), ttl)
                .await
                .map_err(ServiceError::from)
        })
        .await;
        if let Err(e) = recorded {
            tracing::warn!(saga_id = %self.saga_id, error = %e, "Failed to record latest recovery session");
        }
    }

    async fn revoke_credential(&self) -> Result<(), ServiceError> {
        match &self.session_key {
            Some(key) => self.svc.delete_session(key).await,
            None => Ok(()),
        }
    }

    async fn enqueue_notification(&mut self) -> Result<(), ServiceError> {
        let user = self.user.as_ref().ok_or_else(|| self.missing("user"))?;

        let data = match self.method {
            RecoveryMethod::Code => {
                let code = self.code.as_ref().ok_or_else(|| self.missing("code"))?;
                json!({ "user": user.profile(), "code": code })
            }
            RecoveryMethod::Token => {
                let token = self.token.as_ref().ok_or_else(|| self.missing("token"))?;
                let link = format!(
                    "{}/auth/reset-password/{}",
                    self.settings().frontend_url,
                    token
                );
                json!({ "user": user.profile(), "link": link })
            }
        };

        let payload = NotificationPayload {
            recipients: vec![self.email.clone()],
            template_id: self.template.id.clone(),
            data,
        };

        let queue = &self.svc.deps.queue;
        let task_id = bounded("task-queue", self.settings().step_timeout, async {
            queue
                .submit(&payload)
                .await
                .map_err(|e| ServiceError::downstream("task-queue", e))
        })
        .await?;

        tracing::debug!(saga_id = %self.saga_id, task_id = %task_id, "Recovery mail queued");

        self.task_id = Some(task_id);
        self.payload = Some(payload);
        self.svc.deps.store.sweep_expired();
        Ok(())
    }

    async fn cancel_notification(&self) -> Result<(), ServiceError> {
        let Some(task_id) = &self.task_id else {
            return Ok(());
        };
        let queue = &self.svc.deps.queue;
        bounded("task-queue", self.settings().step_timeout, async {
            queue
                .cancel(task_id)
                .await
                .map_err(|e| ServiceError::downstream("task-queue", e))
        })
        .await
    }

    async fn record_history(&mut self) -> Result<(), ServiceError> {
        let task_id = self.task_id.clone().ok_or_else(|| self.missing("task id"))?;
        let payload = self.payload.as_ref().ok_or_else(|| self.missing("payload"))?;

        let record = NotificationHistoryRecord {
            id: task_id.clone(),
            template_id: self.template.id.clone(),
            subject: self.template.subject.clone(),
            body: self.template.body.clone(),
            recipients: payload.recipients.clone(),
            data: serde_json::to_string(&payload.data)?,
            provider: self.template.provider.clone(),
        };

        let history = &self.svc.deps.history;
        bounded("notification-history", self.settings().step_timeout, async {
            history
                .create(&record)
                .await
                .map_err(|e| ServiceError::downstream("notification-history", e))
        })
        .await?;

        self.history_id = Some(task_id);
        Ok(())
    }

    async fn delete_history(&self) -> Result<(), ServiceError> {
        let Some(id) = &self.history_id else {
            return Ok(());
        };
        let history = &self.svc.deps.history;
        bounded("notification-history", self.settings().step_timeout, async {
            history
                .delete(id)
                .await
                .map_err(|e| ServiceError::downstream("notification-history", e))
        })
        .await
    }

    async fn record_delivery_status(&mut self) -> Result<(), ServiceError> {
        let history_id = self.history_id.clone().ok_or_else(|| self.missing("history id"))?;
        let record = DeliveryStatusRecord::pending(
            history_id,
            format!("Send email forgot password to {}", self.email),
        );

        let statuses = &self.svc.deps.statuses;
        bounded("delivery-status", self.settings().step_timeout, async {
            statuses
                .create(&record)
                .await
                .map_err(|e| ServiceError::downstream("delivery-status", e))
        })
        .await
    }

    async fn delete_delivery_status(&self) -> Result<(), ServiceError> {
        let Some(history_id) = &self.history_id else {
            return Ok(());
        };
        let statuses = &self.svc.deps.statuses;
        bounded("delivery-status", self.settings().step_timeout, async {
            statuses
                .delete(history_id, DeliveryStatusRecord::PENDING)
                .await
                .map_err(|e| ServiceError::downstream("delivery-status", e))
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    IssueCredential,
    EnqueueNotification,
    RecordNotificationHistory,
    RecordDeliveryStatus,
}

impl RecoveryStep {
    pub const ALL: [RecoveryStep; 4] = [
        RecoveryStep::IssueCredential,
        RecoveryStep::EnqueueNotification,
        RecoveryStep::RecordNotificationHistory,
        RecoveryStep::RecordDeliveryStatus,
    ];
}

#[async_trait]
impl SagaStep<RecoveryRun> for RecoveryStep {
    type Error = ServiceError;

    fn name(&self) -> &'static str {
        match self {
            RecoveryStep::IssueCredential => "issue_credential",
            RecoveryStep::EnqueueNotification => "enqueue_notification",
            RecoveryStep::RecordNotificationHistory => "record_notification_history",
            RecoveryStep::RecordDeliveryStatus => "record_delivery_status",
        }
    }

    async fn forward(&self, run: &mut RecoveryRun) -> Result<(), ServiceError> {
        match self {
            RecoveryStep::IssueCredential => run.issue_credential().await,
            RecoveryStep::EnqueueNotification => run.enqueue_notification().await,
            RecoveryStep::RecordNotificationHistory => run.record_history().await,
            RecoveryStep::RecordDeliveryStatus => run.record_delivery_status().await,
        }
    }

    async fn compensate(&self, run: &RecoveryRun) -> Result<(), ServiceError> {
        match self {
            RecoveryStep::IssueCredential => run.revoke_credential().await,
            RecoveryStep::EnqueueNotification => run.cancel_notification().await,
            RecoveryStep::RecordNotificationHistory => run.delete_history().await,
            RecoveryStep::RecordDeliveryStatus => run.delete_delivery_status().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::background::BackgroundTasks;
    use crate::services::cache::MockCache;
    use crate::services::durable::MockDurableStore;
    use crate::services::mail_client::MockMailService;
    use crate::services::task_queue::MockTaskQueue;
    use crate::services::users::MockUserDirectory;

    struct Fixture {
        service: RecoveryService,
        cache: Arc<MockCache>,
        queue: Arc<MockTaskQueue>,
        mail: Arc<MockMailService>,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MockUserDirectory::new());
        users.add_user("user-1", "a@x.com");
        let cache = Arc::new(MockCache::new());
        let store = SessionStore::new(
            cache.clone(),
            Arc::new(MockDurableStore::new()),
            BackgroundTasks::new(2, 32),
        );
        let queue = Arc::new(MockTaskQueue::new());
        let mail = Arc::new(MockMailService::with_default_template());

        let service = RecoveryService::new(
            RecoveryCollaborators {
                users,
                store,
                queue: queue.clone(),
                templates: mail.clone(),
                history: mail.clone(),
                statuses: mail.clone(),
                tokens: RecoveryTokenIssuer::new("unit-test-secret-unit-test-secret"),
            },
            RecoverySettings::default(),
        );

        Fixture {
            service,
            cache,
            queue,
            mail,
        }
    }

    #[tokio::test]
    async fn test_token_payload_carries_reset_link() {
        let f = fixture();
        let outcome = f
            .service
            .request_recovery("a@x.com", "web", "token")
            .await
            .unwrap();

        let token = outcome.token.unwrap();
        assert!(outcome.code.is_none());
        assert!(f.cache.peek(&token).is_some());

        let (_, payload) = f.queue.queued().pop().unwrap();
        assert_eq!(
            payload.data["link"],
            format!("http://localhost:3000/auth/reset-password/{}", token)
        );
        assert!(payload.data.get("code").is_none());
    }

    #[tokio::test]
    async fn test_history_and_status_reference_task() {
        let f = fixture();
        f.service
            .request_recovery("a@x.com", "web", "code")
            .await
            .unwrap();

        let (task_id, _) = f.queue.queued().pop().unwrap();
        let history = f.mail.history(&task_id).unwrap();
        assert_eq!(history.template_id, "forgot-password");
        assert_eq!(history.recipients, vec!["a@x.com".to_string()]);

        let statuses = f.mail.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].mail_history_id, task_id);
        assert_eq!(statuses[0].status, "pending");
        assert_eq!(statuses[0].message, "Send email forgot password to a@x.com");
    }

    #[tokio::test]
    async fn test_missing_template_aborts_before_any_step() {
        let f = fixture();
        f.mail.fail_template(true);

        let err = f
            .service
            .request_recovery("a@x.com", "web", "code")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Downstream { service: "mail-templates", .. }));
        assert_eq!(f.cache.write_count(), 0);
        assert_eq!(f.queue.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_new_request_supersedes_previous_code() {
        let f = fixture();
        let first = f
            .service
            .request_recovery("a@x.com", "web", "code")
            .await
            .unwrap()
            .code
            .unwrap();
        let second = f
            .service
            .request_recovery("a@x.com", "web", "code")
            .await
            .unwrap()
            .code
            .unwrap();
        f.service.store().flush().await;

        assert!(f.service.verify_code(&second, "a@x.com").await.unwrap());
        if first != second {
            assert!(!f.service.verify_code(&first, "a@x.com").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_consume_token_removes_session() {
        let f = fixture();
        let token = f
            .service
            .request_recovery("a@x.com", "web", "token")
            .await
            .unwrap()
            .token
            .unwrap();

        assert!(f.service.verify_token(&token).await.unwrap());
        assert_eq!(f.service.consume_token(&token).await.unwrap(), "user-1");
        f.service.store().flush().await;

        assert!(!f.service.verify_token(&token).await.unwrap());
        assert!(matches!(
            f.service.consume_token(&token).await,
            Err(ServiceError::InvalidToken)
        ));
    }
}
