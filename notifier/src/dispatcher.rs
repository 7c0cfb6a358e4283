use crate::audit_log::AuditLog;
use crate::config::NotifierConfig;
use crate::errors::NotifyError;
use crate::event::{NotificationEvent, Outcome};
use crate::metrics_defs::{AUDIT_LOG_ERRORS, JOB_RESULTS, WEBHOOK_DELIVERIES};
use crate::webhook::{Notifier, WebhookNotifier};
use shared::counter;
use std::sync::Arc;
use std::time::Duration;

struct Channel {
    notifier: Arc<dyn Notifier>,
    attempts: u32,
    base_delay: Duration,
}

/// Records job outcomes. Failures go to the audit log and, if configured,
/// to a notification channel; successes are only traced and counted.
///
/// Neither operation returns an error: a problem while notifying must not
/// affect the job that is being reported on.
pub struct Dispatcher {
    audit_log: AuditLog,
    channel: Option<Channel>,
}

impl Dispatcher {
    pub fn new(audit_log: AuditLog) -> Self {
        Dispatcher {
            audit_log,
            channel: None,
        }
    }

    pub fn from_config(config: &NotifierConfig) -> Result<Self, NotifyError> {
        let dispatcher = Dispatcher::new(AuditLog::new(&config.audit_log));
        Ok(match &config.webhook {
            Some(webhook) => dispatcher.with_channel(
                Arc::new(WebhookNotifier::new(webhook)?),
                webhook.attempts,
                webhook.base_delay(),
            ),
            None => dispatcher,
        })
    }

    /// Delivers failures through `notifier`, trying up to `attempts` times
    /// with the delay doubling from `base_delay`.
    pub fn with_channel(
        mut self,
        notifier: Arc<dyn Notifier>,
        attempts: u32,
        base_delay: Duration,
    ) -> Self {
        self.channel = Some(Channel {
            notifier,
            attempts: attempts.max(1),
            base_delay,
        });
        self
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    pub async fn record_failure(&self, job: &str, message: &str, details: Option<&str>) {
        counter!(JOB_RESULTS, "job" => job.to_string(), "outcome" => "error").increment(1);
        tracing::error!(job, message, details, "sync job failed");

        let event = NotificationEvent::error(job, message, details);
        self.write_audit(&event);

        let Some(channel) = &self.channel else {
            return;
        };

        if let Err(err) = self.deliver(channel, &event).await {
            tracing::error!(
                job,
                channel = channel.notifier.channel_name(),
                error = %err,
                "could not deliver failure notification"
            );
            let delivery_failure = NotificationEvent::error(
                job,
                "failure notification could not be delivered",
                Some(&err.to_string()),
            );
            self.write_audit(&delivery_failure);
        }
    }

    pub fn record_success(&self, job: &str, summary: &str) {
        counter!(JOB_RESULTS, "job" => job.to_string(), "outcome" => Outcome::Success.as_str())
            .increment(1);
        tracing::info!(job, summary, "sync job succeeded");
    }

    async fn deliver(&self, channel: &Channel, event: &NotificationEvent) -> Result<(), NotifyError> {
        let mut attempt = 0;
        loop {
            match channel.notifier.send(event).await {
                Ok(()) => {
                    counter!(WEBHOOK_DELIVERIES, "result" => "ok").increment(1);
                    return Ok(());
                }
                Err(err) => {
                    counter!(WEBHOOK_DELIVERIES, "result" => "error").increment(1);
                    attempt += 1;
                    if attempt >= channel.attempts {
                        return Err(err);
                    }
                    let delay = channel.base_delay.saturating_mul(2_u32.saturating_pow(attempt - 1));
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "notification delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn write_audit(&self, event: &NotificationEvent) {
        if let Err(err) = self.audit_log.append(event) {
            counter!(AUDIT_LOG_ERRORS).increment(1);
            tracing::error!(
                path = %self.audit_log.path().display(),
                error = %err,
                "could not write audit log"
            );
        }
    }
}
