//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential backoff with additive jitter.
///
/// delay(attempt) = base_delay * 2^(attempt - 1) + uniform[0, jitter_ceiling)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry (jitter excluded).
    pub base_delay: Duration,

    /// Exclusive upper bound of the random jitter.
    pub jitter_ceiling: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, jitter_ceiling: Duration) -> Self {
        Self {
            base_delay,
            jitter_ceiling,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.jitter_ms),
        )
    }

    /// Deterministic part of the delay.
    ///
    /// `attempt` is the number of failures so far (1-indexed); 0 is treated as 1.
    /// With base=500ms: 500ms, 1000ms, 2000ms, ...
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Full delay including jitter. Safe to call from many tasks at once:
    /// the jitter comes from the thread-local RNG.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = self.exponential_delay(attempt);
        let ceiling_ms = self.jitter_ceiling.as_millis() as u64;
        let jitter_ms = if ceiling_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..ceiling_ms)
        };
        let delay = exp.saturating_add(Duration::from_millis(jitter_ms));
        tracing::debug!(
            attempt,
            exp_ms = exp.as_millis() as u64,
            jitter_ms,
            delay_ms = delay.as_millis() as u64,
            "computed backoff with jitter"
        );
        delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(250))
    }
}
