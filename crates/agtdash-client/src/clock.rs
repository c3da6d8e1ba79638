//! Session clock.
//!
//! Both time bases derive from one tokio [`Instant`], so timers, TTLs and
//! health timestamps all follow paused time in tests.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
        }
    }

    /// Milliseconds since the session started.
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Wall-clock time, advanced by the session's monotonic clock.
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::MAX);
        self.wall_origin
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The [`Instant`] that corresponds to `ms` on the session clock.
    pub fn instant_at(&self, ms: u64) -> Instant {
        self.origin + std::time::Duration::from_millis(ms)
    }
}
