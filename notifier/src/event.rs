use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest `details` string kept on an event, in characters.
pub const MAX_DETAIL_CHARS: usize = 1000;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }
}

/// One line of the audit log, and the content of a webhook message.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NotificationEvent {
    pub job: String,
    pub outcome: Outcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(job: &str, outcome: Outcome, message: &str, details: Option<&str>) -> Self {
        NotificationEvent {
            job: job.to_string(),
            outcome,
            message: message.to_string(),
            details: details.map(truncate_details),
            timestamp: Utc::now(),
        }
    }

    pub fn error(job: &str, message: &str, details: Option<&str>) -> Self {
        NotificationEvent::new(job, Outcome::Error, message, details)
    }
}

/// Cuts `details` to at most `MAX_DETAIL_CHARS` characters.
pub fn truncate_details(details: &str) -> String {
    match details.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((cut, _)) => details[..cut].to_string(),
        None => details.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_details() {
        assert_eq!(truncate_details("short"), "short");

        let exact = "x".repeat(MAX_DETAIL_CHARS);
        assert_eq!(truncate_details(&exact), exact);

        let long = "y".repeat(MAX_DETAIL_CHARS + 10);
        assert_eq!(truncate_details(&long).len(), MAX_DETAIL_CHARS);

        // Multi-byte characters are never split.
        let accented = "é".repeat(MAX_DETAIL_CHARS + 1);
        let truncated = truncate_details(&accented);
        assert_eq!(truncated.chars().count(), MAX_DETAIL_CHARS);
        assert_eq!(truncated.len(), MAX_DETAIL_CHARS * 2);
    }

    #[test]
    fn test_event_json_line() {
        let event = NotificationEvent::error("dsc", "sync failed", None);
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains(r#""outcome":"error""#));
        assert!(!line.contains("details"));

        let parsed: NotificationEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event);
    }
}
