//! Realtime channel lifecycle state machine.
//!
//! ```text
//! Disconnected ──Connect──▶ Connecting ──Opened──▶ Connected
//!      ▲                        │                     │
//!      └──ReconnectDue◀── scheduled ◀──Closed/Errored─┘
//!                               │
//!                  attempts exhausted ──▶ GivenUp ──ManualReconnect──▶ Connecting
//! ```
//!
//! [`transition`] is the only way to change a [`ChannelState`]. It performs
//! no IO; the driver executes the returned [`ChannelEffect`]s (open or close
//! the socket, arm timers, dispatch refetches) and feeds the resulting
//! events back in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backoff::reconnect_delay_ms;
use crate::message::InboundMessage;
use crate::types::{OutputEvent, Resource};

// ─── Config ──────────────────────────────────────────────────────────

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_STALENESS_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_STALENESS_THRESHOLD_MS: u64 = 90_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_CAP_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub heartbeat_interval_ms: u64,
    pub staleness_check_interval_ms: u64,
    pub staleness_threshold_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    /// Upper bound on the socket handshake; expiry counts as an error.
    pub connect_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            staleness_check_interval_ms: DEFAULT_STALENESS_CHECK_INTERVAL_MS,
            staleness_threshold_ms: DEFAULT_STALENESS_THRESHOLD_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_ms: DEFAULT_RECONNECT_BASE_MS,
            reconnect_cap_ms: DEFAULT_RECONNECT_CAP_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

// ─── State ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Automatic reconnects exhausted; only a manual reconnect resumes.
    GivenUp,
    /// Torn down; every further event is ignored.
    Closed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub phase: ChannelPhase,
    pub raw_connected: bool,
    pub reconnect_attempt: u32,
    pub is_reconnecting: bool,
    pub last_heartbeat_ms: u64,
}

impl ChannelState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_heartbeat_ms: now_ms,
            ..Self::default()
        }
    }
}

// ─── Events & effects ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connect,
    Opened,
    Closed { reason: String },
    Errored { detail: String },
    Message(InboundMessage),
    HeartbeatDue,
    StalenessCheck,
    ReconnectDue,
    ManualReconnect,
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEffect {
    OpenSocket,
    CloseSocket,
    StartHeartbeat,
    StopHeartbeat,
    SendPing,
    ScheduleReconnect { delay_ms: u64, attempt: u32 },
    CancelReconnect,
    /// Force a fresh fetch of a resource.
    Refetch(Resource),
    /// Patch the agent status in place, without a round-trip.
    PatchStatus { agent_status: String, at: DateTime<Utc> },
    AppendOutput(OutputEvent),
    GaveUp { attempts: u32 },
}

// ─── Transition function ─────────────────────────────────────────────

/// Pure state machine: apply one event. `now_ms` is a monotonic session
/// clock; `wall` stamps patches shown to the user.
#[must_use]
pub fn transition(
    state: &ChannelState,
    event: ChannelEvent,
    config: &ChannelConfig,
    now_ms: u64,
    wall: DateTime<Utc>,
) -> (ChannelState, Vec<ChannelEffect>) {
    let mut next = state.clone();
    let mut effects = Vec::new();

    if state.phase == ChannelPhase::Closed {
        return (next, effects);
    }

    match event {
        ChannelEvent::Connect => connect(&mut next, &mut effects),

        ChannelEvent::Opened => {
            if next.phase != ChannelPhase::Connecting {
                // Socket we no longer want (e.g. superseded attempt).
                effects.push(ChannelEffect::CloseSocket);
            } else {
                next.phase = ChannelPhase::Connected;
                next.raw_connected = true;
                next.reconnect_attempt = 0;
                next.is_reconnecting = false;
                next.last_heartbeat_ms = now_ms;
                effects.push(ChannelEffect::StartHeartbeat);
            }
        }

        ChannelEvent::Closed { .. } | ChannelEvent::Errored { .. } => {
            if matches!(
                next.phase,
                ChannelPhase::Connecting | ChannelPhase::Connected
            ) {
                next.phase = ChannelPhase::Disconnected;
                next.raw_connected = false;
                effects.push(ChannelEffect::StopHeartbeat);
                schedule_reconnect(&mut next, &mut effects, config);
            }
        }

        ChannelEvent::Message(message) => {
            if next.phase == ChannelPhase::Connected {
                dispatch(&mut next, &mut effects, message, now_ms, wall);
            }
        }

        ChannelEvent::HeartbeatDue => {
            if next.phase == ChannelPhase::Connected {
                effects.push(ChannelEffect::SendPing);
            }
        }

        ChannelEvent::StalenessCheck => {
            let silent_for = now_ms.saturating_sub(next.last_heartbeat_ms);
            if next.raw_connected && silent_for >= config.staleness_threshold_ms {
                manual_reconnect(&mut next, &mut effects);
            }
        }

        ChannelEvent::ReconnectDue => {
            if next.is_reconnecting {
                next.is_reconnecting = false;
                connect(&mut next, &mut effects);
            }
        }

        ChannelEvent::ManualReconnect => manual_reconnect(&mut next, &mut effects),

        ChannelEvent::Teardown => {
            next.phase = ChannelPhase::Closed;
            next.raw_connected = false;
            next.is_reconnecting = false;
            effects.extend([
                ChannelEffect::StopHeartbeat,
                ChannelEffect::CancelReconnect,
                ChannelEffect::CloseSocket,
            ]);
        }
    }

    (next, effects)
}

/// No-op while a socket is already open or opening.
fn connect(state: &mut ChannelState, effects: &mut Vec<ChannelEffect>) {
    if matches!(
        state.phase,
        ChannelPhase::Connecting | ChannelPhase::Connected
    ) {
        return;
    }
    state.phase = ChannelPhase::Connecting;
    effects.push(ChannelEffect::OpenSocket);
}

fn schedule_reconnect(
    state: &mut ChannelState,
    effects: &mut Vec<ChannelEffect>,
    config: &ChannelConfig,
) {
    if state.is_reconnecting {
        return;
    }
    if state.reconnect_attempt >= config.max_reconnect_attempts {
        state.phase = ChannelPhase::GivenUp;
        effects.push(ChannelEffect::GaveUp {
            attempts: state.reconnect_attempt,
        });
        return;
    }
    let delay_ms = reconnect_delay_ms(
        state.reconnect_attempt,
        config.reconnect_base_ms,
        config.reconnect_cap_ms,
    );
    state.is_reconnecting = true;
    effects.push(ChannelEffect::ScheduleReconnect {
        delay_ms,
        attempt: state.reconnect_attempt,
    });
    state.reconnect_attempt = state.reconnect_attempt.saturating_add(1);
}

fn manual_reconnect(state: &mut ChannelState, effects: &mut Vec<ChannelEffect>) {
    effects.push(ChannelEffect::CancelReconnect);
    state.is_reconnecting = false;
    state.reconnect_attempt = 0;
    if matches!(
        state.phase,
        ChannelPhase::Connecting | ChannelPhase::Connected
    ) {
        effects.extend([ChannelEffect::StopHeartbeat, ChannelEffect::CloseSocket]);
    }
    state.phase = ChannelPhase::Disconnected;
    state.raw_connected = false;
    connect(state, effects);
}

fn dispatch(
    state: &mut ChannelState,
    effects: &mut Vec<ChannelEffect>,
    message: InboundMessage,
    now_ms: u64,
    wall: DateTime<Utc>,
) {
    if message.refreshes_heartbeat() {
        state.last_heartbeat_ms = now_ms;
    }
    if let Some(line) = message.log_line() {
        effects.push(ChannelEffect::AppendOutput(line.clone()));
    }
    match message {
        InboundMessage::TodoUpdate(_) | InboundMessage::TaskUpdate(_) => {
            effects.push(ChannelEffect::Refetch(Resource::Tasks));
        }
        InboundMessage::GraphUpdate(_) => effects.push(ChannelEffect::Refetch(Resource::Graph)),
        InboundMessage::StatusUpdate(_) => effects.push(ChannelEffect::Refetch(Resource::Status)),
        InboundMessage::TerminalUpdate(None) => {
            effects.push(ChannelEffect::Refetch(Resource::Terminal));
        }
        InboundMessage::AgentStatusChange { status, .. } => {
            effects.push(ChannelEffect::PatchStatus {
                agent_status: status,
                at: wall,
            });
        }
        InboundMessage::TerminalUpdate(Some(_))
        | InboundMessage::Log(_)
        | InboundMessage::Ping
        | InboundMessage::Pong
        | InboundMessage::Unrecognized { .. } => {}
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
