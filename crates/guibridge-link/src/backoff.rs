use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Reconnect delay schedule driven by a [`ReconnectPolicy`].
///
/// Delays grow geometrically from `initial_delay` and are capped at
/// `max_delay`. [`Backoff::next_delay`] returns `None` once `max_attempts`
/// consecutive failures have been recorded.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let current = policy.initial_delay;
        Self {
            policy,
            attempts: 0,
            current,
        }
    }

    /// Delay before the next attempt, or `None` when the policy is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        self.attempts = self.attempts.saturating_add(1);

        let delay = self.current.min(self.policy.max_delay);
        self.current = Duration::try_from_secs_f64(
            self.current.as_secs_f64() * self.policy.multiplier,
        )
        .unwrap_or(self.policy.max_delay)
        .min(self.policy.max_delay);
        Some(delay)
    }

    /// Forget previous failures after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.policy.initial_delay;
    }

    /// Consecutive failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
