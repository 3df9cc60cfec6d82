//! Retry policy for batch delivery.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on any single backoff wait.
pub const MAX_BACKOFF_MS: u64 = 8_000;

/// Exponential backoff: retry `n` waits `min(retry_delay_ms * 2^(n-1), max_backoff_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-indexed). Retry 0 is the first
    /// attempt and never waits.
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        if retry == 0 {
            return 0;
        }
        let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
        self.retry_delay_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms)
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    pub fn backoff_duration(&self, retry: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(retry))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    /// 2 retries, 1s initial backoff, doubling, 8s cap.
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 1_000,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}
