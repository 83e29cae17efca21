//! Mail service collaborators: templates, notification history and delivery
//! status history.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{DeliveryStatusRecord, MailTemplate, NotificationHistoryRecord};

#[async_trait]
pub trait MailTemplates: Send + Sync {
    async fn get(&self, template_id: &str) -> Result<MailTemplate, anyhow::Error>;
}

#[async_trait]
pub trait NotificationHistory: Send + Sync {
    async fn create(&self, record: &NotificationHistoryRecord) -> Result<(), anyhow::Error>;
    async fn delete(&self, id: &str) -> Result<(), anyhow::Error>;
}

#[async_trait]
pub trait DeliveryStatusHistory: Send + Sync {
    async fn create(&self, record: &DeliveryStatusRecord) -> Result<(), anyhow::Error>;

    /// Remove status entries for `mail_history_id` that carry `status`.
    async fn delete(&self, mail_history_id: &str, status: &str) -> Result<(), anyhow::Error>;
}

/// JSON-over-HTTP client for the mail service.
#[derive(Clone)]
pub struct MailServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl MailServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build mail service client: {}", e))?;

        tracing::info!(base_url = %base_url, "Mail service client configured");

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn ensure_success(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow::anyhow!("{} returned {}: {}", what, status, body))
}

#[async_trait]
impl MailTemplates for MailServiceClient {
    async fn get(&self, template_id: &str) -> Result<MailTemplate, anyhow::Error> {
        let response = self
            .http
            .get(self.url(&format!("/templates/{}", template_id)))
            .send()
            .await?;

        Ok(ensure_success(response, "template lookup")
            .await?
            .json::<MailTemplate>()
            .await?)
    }
}

#[async_trait]
impl NotificationHistory for MailServiceClient {
    async fn create(&self, record: &NotificationHistoryRecord) -> Result<(), anyhow::Error> {
        let response = self
            .http
            .post(self.url("/histories"))
            .json(record)
            .send()
            .await?;
        ensure_success(response, "history create").await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), anyhow::Error> {
        let response = self
            .http
            .delete(self.url(&format!("/histories/{}", id)))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response, "history delete").await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryStatusHistory for MailServiceClient {
    async fn create(&self, record: &DeliveryStatusRecord) -> Result<(), anyhow::Error> {
        let response = self
            .http
            .post(self.url("/delivery-statuses"))
            .json(record)
            .send()
            .await?;
        ensure_success(response, "delivery status create").await?;
        Ok(())
    }

    async fn delete(&self, mail_history_id: &str, status: &str) -> Result<(), anyhow::Error> {
        let response = self
            .http
            .delete(self.url("/delivery-statuses"))
            .query(&[("mail_history_id", mail_history_id), ("status", status)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response, "delivery status delete").await?;
        Ok(())
    }
}

/// In-memory stand-in for the mail service.
#[derive(Default)]
pub struct MockMailService {
    templates: Mutex<HashMap<String, MailTemplate>>,
    histories: Mutex<HashMap<String, NotificationHistoryRecord>>,
    statuses: Mutex<Vec<DeliveryStatusRecord>>,
    fail_template: AtomicBool,
    fail_history_create: AtomicBool,
    fail_history_delete: AtomicBool,
    fail_status_create: AtomicBool,
}

impl MockMailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock with a `forgot-password` template registered.
    pub fn with_default_template() -> Self {
        let mock = Self::new();
        mock.add_template(MailTemplate {
            id: "forgot-password".to_string(),
            subject: "Reset your password".to_string(),
            body: "Your code is {{code}}".to_string(),
            provider: "smtp".to_string(),
        });
        mock
    }

    pub fn add_template(&self, template: MailTemplate) {
        if let Ok(mut templates) = self.templates.lock() {
            templates.insert(template.id.clone(), template);
        }
    }

    pub fn fail_template(&self, fail: bool) {
        self.fail_template.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history_create(&self, fail: bool) {
        self.fail_history_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history_delete(&self, fail: bool) {
        self.fail_history_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status_create(&self, fail: bool) {
        self.fail_status_create.store(fail, Ordering::SeqCst);
    }

    pub fn history(&self, id: &str) -> Option<NotificationHistoryRecord> {
        self.histories.lock().ok()?.get(id).cloned()
    }

    pub fn history_count(&self) -> usize {
        self.histories.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn statuses(&self) -> Vec<DeliveryStatusRecord> {
        self.statuses.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTemplates for MockMailService {
    async fn get(&self, template_id: &str) -> Result<MailTemplate, anyhow::Error> {
        if self.fail_template.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock template service unavailable"));
        }
        self.templates
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock mail mutex poisoned: {}", e))?
            .get(template_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Template {} not found", template_id))
    }
}

#[async_trait]
impl NotificationHistory for MockMailService {
    async fn create(&self, record: &NotificationHistoryRecord) -> Result<(), anyhow::Error> {
        if self.fail_history_create.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock history write failure"));
        }
        self.histories
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock mail mutex poisoned: {}", e))?
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), anyhow::Error> {
        if self.fail_history_delete.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock history delete failure"));
        }
        self.histories
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock mail mutex poisoned: {}", e))?
            .remove(id);
        Ok(())
    }
}

#[async_trait]
impl DeliveryStatusHistory for MockMailService {
    async fn create(&self, record: &DeliveryStatusRecord) -> Result<(), anyhow::Error> {
        if self.fail_status_create.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock delivery status write failure"));
        }
        self.statuses
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock mail mutex poisoned: {}", e))?
            .push(record.clone());
        Ok(())
    }

    async fn delete(&self, mail_history_id: &str, status: &str) -> Result<(), anyhow::Error> {
        self.statuses
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock mail mutex poisoned: {}", e))?
            .retain(|s| !(s.mail_history_id == mail_history_id && s.status == status));
        Ok(())
    }
}
