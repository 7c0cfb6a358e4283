//! Failure notification for sync jobs.
//!
//! Every failure is appended to a size-rotated audit log and, when a webhook
//! is configured, pushed to a chat channel. Delivery problems are logged and
//! never surface to the caller.

pub mod audit_log;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod metrics_defs;
pub mod webhook;

pub use audit_log::AuditLog;
pub use config::NotifierConfig;
pub use dispatcher::Dispatcher;
pub use errors::NotifyError;
pub use event::{NotificationEvent, Outcome};
pub use webhook::{Notifier, WebhookNotifier};
