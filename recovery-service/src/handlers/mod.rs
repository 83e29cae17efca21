//! HTTP handlers for recovery-service.

pub mod authz;
pub mod metrics;
pub mod recovery;
pub mod session;

pub use authz::*;
pub use recovery::*;
pub use session::*;
