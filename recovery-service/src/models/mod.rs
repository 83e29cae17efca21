pub mod notification;
pub mod permission_snapshot;
pub mod recovery_session;
pub mod user;

pub use notification::{
    DeliveryStatusRecord, MailTemplate, NotificationHistoryRecord, NotificationPayload,
};
pub use permission_snapshot::{Permission, PermissionSet, PermissionSnapshot, Scope};
pub use recovery_session::{RecoveryMethod, RecoverySession};
pub use user::{User, UserProfile};
