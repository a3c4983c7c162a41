//! Exponential backoff for publish retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: `base * factor^(retry - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub factor: u32,
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            factor: 2,
            max_ms: 8_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given retry (1-based). Retry 0 is the first attempt.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let multiplier = (self.factor as u64).saturating_pow(retry - 1);
        let delay = self.base_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.max_ms))
    }
}
