//! Connection status stabilizer.
//!
//! Debounces the raw "channel connected" boolean so that sub-second drops do
//! not flash a disconnected banner:
//!
//! - **Connect**: cancels any pending disconnect; flips to connected after
//!   `connect_delay_ms` (immediately when 0). A new connect replaces a
//!   pending connect timer.
//! - **Disconnect**: cancels any pending connect; starts the disconnect timer
//!   only if none is pending, and flips when that timer fires.
//!
//! Time is supplied by the caller in milliseconds. The driver calls
//! [`ConnectionStabilizer::advance`] at [`ConnectionStabilizer::next_deadline`].

/// Default delay before showing "disconnected" (milliseconds).
pub const DEFAULT_DISCONNECT_DELAY_MS: u64 = 2_000;

/// Default delay before showing "connected" (milliseconds).
pub const DEFAULT_CONNECT_DELAY_MS: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilizerConfig {
    pub disconnect_delay_ms: u64,
    pub connect_delay_ms: u64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            disconnect_delay_ms: DEFAULT_DISCONNECT_DELAY_MS,
            connect_delay_ms: DEFAULT_CONNECT_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStabilizer {
    config: StabilizerConfig,
    /// Value shown to the user.
    stable: bool,
    /// Last raw value observed.
    raw: bool,
    /// When the pending "show connected" timer fires.
    connect_at: Option<u64>,
    /// When the pending "show disconnected" timer fires.
    disconnect_at: Option<u64>,
}

impl ConnectionStabilizer {
    /// Start with `initial` as both the raw and the stable value.
    pub fn new(initial: bool, config: StabilizerConfig) -> Self {
        Self {
            config,
            stable: initial,
            raw: initial,
            connect_at: None,
            disconnect_at: None,
        }
    }

    pub fn stable(&self) -> bool {
        self.stable
    }

    pub fn raw(&self) -> bool {
        self.raw
    }

    /// Feed a raw value. Timers already due at `now_ms` fire first; only
    /// transitions of the raw value then start or cancel timers. Returns
    /// `true` if the stable value changed.
    pub fn observe(&mut self, raw: bool, now_ms: u64) -> bool {
        let before = self.stable;
        self.advance(now_ms);
        if raw == self.raw {
            return self.stable != before;
        }
        self.raw = raw;

        if raw {
            self.disconnect_at = None;
            if self.config.connect_delay_ms > 0 {
                self.connect_at = Some(now_ms.saturating_add(self.config.connect_delay_ms));
            } else {
                self.connect_at = None;
                self.stable = true;
            }
        } else {
            self.connect_at = None;
            if self.disconnect_at.is_none() {
                if self.config.disconnect_delay_ms > 0 {
                    self.disconnect_at =
                        Some(now_ms.saturating_add(self.config.disconnect_delay_ms));
                } else {
                    self.stable = false;
                }
            }
        }

        self.stable != before
    }

    /// Fire every timer due at or before `now_ms`. Returns `true` if the
    /// stable value changed.
    pub fn advance(&mut self, now_ms: u64) -> bool {
        let before = self.stable;
        if self.disconnect_at.is_some_and(|at| at <= now_ms) {
            self.disconnect_at = None;
            self.stable = false;
        }
        if self.connect_at.is_some_and(|at| at <= now_ms) {
            self.connect_at = None;
            self.stable = true;
        }
        self.stable != before
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.connect_at, self.disconnect_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drop every pending timer; the stable value stays as is.
    pub fn cancel_all(&mut self) {
        self.connect_at = None;
        self.disconnect_at = None;
    }
}
