//! Delay schedules for request retries and channel reconnects.

use std::time::Duration;

/// Retry schedule for a single HTTP request:
/// `min(base * 2^attempt + jitter, cap)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound (exclusive) of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_millis(4_000),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed). `jitter` is clamped
    /// to `max_jitter`.
    #[must_use]
    pub fn delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let jitter = jitter.min(self.max_jitter);
        exponential(self.base, attempt)
            .saturating_add(jitter)
            .min(self.cap)
    }
}

/// Reconnect schedule for the realtime channel: `min(base * 2^attempt, cap)`.
#[must_use]
pub fn reconnect_delay_ms(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(cap_ms)
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}
