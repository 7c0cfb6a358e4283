use crate::config::RateLimitConfig;
use crate::metrics_defs::RATE_LIMITER_TRACKED;
use parking_lot::Mutex;
use shared::gauge;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests still admitted in the current window after this one.
    pub remaining: u32,
    /// How long until a slot frees up. Zero when allowed.
    pub retry_after: Duration,
}

struct State {
    windows: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

/// Sliding window rate limiter keyed by an arbitrary identifier.
///
/// A request is admitted if fewer than `max_requests` admitted requests from
/// the same identifier fall within the trailing window. Rejected requests do
/// not count.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    sweep_interval: Duration,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, sweep_interval: Duration) -> Self {
        RateLimiter {
            max_requests,
            window,
            sweep_interval,
            state: Mutex::new(State {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        RateLimiter::new(config.max_requests, config.window(), config.sweep_interval())
    }

    pub fn check(&self, id: &str) -> Decision {
        let now = Instant::now();
        let mut state = self.state.lock();

        if now.duration_since(state.last_sweep) >= self.sweep_interval {
            self.sweep(&mut state, now);
        }

        let timestamps = state.windows.entry(id.to_string()).or_default();
        prune(timestamps, now, self.window);

        let used = timestamps.len() as u32;
        if used < self.max_requests {
            timestamps.push_back(now);
            return Decision {
                allowed: true,
                remaining: self.max_requests - used - 1,
                retry_after: Duration::ZERO,
            };
        }

        let retry_after = timestamps
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(self.window);
        Decision {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }

    /// Number of identifiers currently holding state.
    pub fn tracked(&self) -> usize {
        self.state.lock().windows.len()
    }

    fn sweep(&self, state: &mut State, now: Instant) {
        state.windows.retain(|_, timestamps| {
            prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });
        state.last_sweep = now;
        gauge!(RATE_LIMITER_TRACKED).set(state.windows.len() as f64);
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.duration_since(*oldest) < window {
            break;
        }
        timestamps.pop_front();
    }
}
