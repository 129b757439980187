//! Redelivery backoff for failed provisioning.

use crate::message::ProcessingResult;
use std::time::Duration;

/// Exponential backoff with a dead-letter cutoff
///
/// Attempt `n` (1-based) waits `initial * multiplier^(n-1)`, capped at
/// `max_delay`. Once `max_attempts` deliveries have failed the message is
/// dead-lettered.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Delay before redelivering after failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Outcome for a delivery whose provisioning failed on `attempt`
    pub fn decide(&self, attempt: u32) -> ProcessingResult {
        if attempt >= self.max_attempts {
            ProcessingResult::DeadLetter
        } else {
            ProcessingResult::Retry {
                after: self.delay_for(attempt),
            }
        }
    }
}
