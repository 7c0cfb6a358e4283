use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("audit_log.max_bytes must be greater than 0")]
    InvalidMaxBytes,
    #[error("webhook.attempts must be at least 1")]
    InvalidAttempts,
    #[error("webhook.timeout_secs cannot be 0")]
    InvalidTimeout,
    #[error("webhook url must use http or https, got {0}")]
    InvalidScheme(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AuditLogConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
    /// The log is rotated once it reaches this size.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Number of rotated generations kept next to the live file.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("logs/audit.log")
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> usize {
    5
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        AuditLogConfig {
            path: default_audit_path(),
            max_bytes: default_max_bytes(),
            max_files: default_max_files(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WebhookConfig {
    pub url: Url,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    10
}

impl WebhookConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NotifierConfig {
    #[serde(default)]
    pub audit_log: AuditLogConfig,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl NotifierConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.audit_log.max_bytes == 0 {
            return Err(ValidationError::InvalidMaxBytes);
        }
        if let Some(webhook) = &self.webhook {
            if webhook.attempts == 0 {
                return Err(ValidationError::InvalidAttempts);
            }
            if webhook.timeout_secs == 0 {
                return Err(ValidationError::InvalidTimeout);
            }
            if !matches!(webhook.url.scheme(), "http" | "https") {
                return Err(ValidationError::InvalidScheme(
                    webhook.url.scheme().to_string(),
                ));
            }
        }
        Ok(())
    }
}
