use rand::Rng;
use std::time::Duration;

/// Exponential backoff with additive random jitter.
///
/// The delay before retry `n` (0-based) is `base * 2^n` plus a uniform jitter
/// in `[0, jitter]`, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Backoff { base, max, jitter }
    }

    /// Delay before retry `attempt`, without jitter.
    pub fn exponential(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.exponential(attempt).saturating_add(jitter).min(self.max)
    }

    pub async fn wait(&self, attempt: u32) {
        tokio::time::sleep(self.delay(attempt)).await;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(
            Duration::from_millis(500),
            Duration::from_secs(10),
            Duration::from_millis(250),
        )
    }
}
