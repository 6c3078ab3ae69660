//! Exponential backoff with jitter

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff between delivery attempts
///
/// The delay after attempt `n` is `base_delay * 2^(n-1)`, capped at
/// `max_delay`, plus a uniform jitter in `0..=max_jitter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 15_000,
            max_jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Millisecond-scale delays without jitter, for tests and local runs
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 1,
            max_delay_ms: 5,
            max_jitter_ms: 0,
        }
    }

    /// Delay after `attempt` (1-based), before jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay after `attempt` with jitter applied
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter_ms)
        };
        self.delay_for_attempt(attempt) + Duration::from_millis(jitter)
    }
}
