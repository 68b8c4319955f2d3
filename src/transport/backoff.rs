use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential reconnect schedule: `initial_delay` doubling up to `max_delay`,
/// at most `max_attempts` scheduled reconnects between successful opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

/// Cursor over a `ReconnectPolicy`. Reset to the floor on every successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            delay: policy.initial_delay,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Consume one attempt and return the delay to wait before it,
    /// or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay.min(self.policy.max_delay);
        self.attempts += 1;
        self.delay = (self.delay * 2).min(self.policy.max_delay);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.policy.initial_delay;
    }
}
