use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

/// A cron cadence. Accepts standard 5-field expressions as well as the
/// 6-field form with a leading seconds field.
#[derive(Clone, Debug)]
pub struct Cadence {
    expression: String,
    schedule: Schedule,
}

impl Cadence {
    pub fn parse(expression: &str) -> Result<Self, cron::error::Error> {
        let schedule = Schedule::from_str(&normalize_cron(expression))?;
        Ok(Cadence {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// Time left from `now` until `at`, zero if `at` has passed.
pub fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

// The cron crate wants a seconds field.
fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}
