//! Reconnection backoff math.
//!
//! Runtime-agnostic: the transport owns the sleeping, this only decides how
//! long and how many times.

use std::time::Duration;

/// Transport-level reconnection settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Attempts after an unexpected drop before giving up. Zero disables
    /// reconnection.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(5_000),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> BackoffState {
        BackoffState::new(*self)
    }
}

/// Exponential backoff state for one reconnection cycle.
#[derive(Debug, Clone, Copy)]
pub struct BackoffState {
    policy: ReconnectPolicy,
    attempts: u32,
    delay: Duration,
}

impl BackoffState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            delay: policy.initial_delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Advance to the next attempt, updating the delay for the subsequent attempt.
    ///
    /// Returns the delay to wait *before* performing this attempt.
    pub fn next_delay_and_advance(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let current = self.delay;
        self.attempts += 1;
        self.delay = current
            .mul_f64(self.policy.multiplier.max(1.0))
            .min(self.policy.max_delay);
        Some(current)
    }
}
