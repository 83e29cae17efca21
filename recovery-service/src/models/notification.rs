//! Notification models exchanged with the mail service and the task queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mail template as served by the template service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailTemplate {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub provider: String,
}

/// Job submitted to the task queue; the mail worker renders `template_id`
/// with `data` and sends it to `recipients`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub recipients: Vec<String>,
    pub template_id: String,
    pub data: Value,
}

/// Audit record of an attempted notification, keyed by the queue task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationHistoryRecord {
    pub id: String,
    pub template_id: String,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    /// Serialized template data.
    pub data: String,
    pub provider: String,
}

/// Delivery status entry referencing a notification history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatusRecord {
    pub mail_history_id: String,
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl DeliveryStatusRecord {
    pub const PENDING: &'static str = "pending";

    pub fn pending(mail_history_id: String, message: String) -> Self {
        Self {
            mail_history_id,
            status: Self::PENDING.to_string(),
            message,
            created_at: Utc::now(),
        }
    }
}
