//! Realtime channel driver.
//!
//! Owns the WebSocket and every channel timer. Socket and timer activity is
//! turned into [`ChannelEvent`]s, fed through the core state machine, and the
//! resulting effects are executed here. Effects that concern the rest of the
//! session (refetches, status patches, output lines) leave as
//! [`ChannelNotice`]s.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use agtdash_core::channel::{ChannelConfig, ChannelEffect, ChannelEvent, ChannelState, transition};
use agtdash_core::message::{InboundMessage, PING_TOKEN, decode};
use agtdash_core::types::{OutputEvent, Resource};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::clock::SessionClock;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingConnect = Pin<Box<dyn Future<Output = Result<WsStream, String>> + Send>>;

const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);
const NOTICE_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    Reconnect,
}

/// Work the channel hands to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelNotice {
    Refetch(Resource),
    PatchStatus {
        agent_status: String,
        at: DateTime<Utc>,
    },
    Output(OutputEvent),
    GaveUp {
        attempts: u32,
    },
}

/// Cloneable control surface of a running channel driver.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    commands: mpsc::Sender<ChannelCommand>,
    state: watch::Receiver<ChannelState>,
}

impl ChannelHandle {
    /// Request a manual reconnect. Returns `false` if the driver is gone.
    pub fn reconnect(&self) -> bool {
        self.commands.try_send(ChannelCommand::Reconnect).is_ok()
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }
}

/// Start the driver. It connects immediately and runs until `cancel` fires.
pub fn spawn_channel(
    url: Url,
    config: ChannelConfig,
    clock: SessionClock,
    cancel: CancellationToken,
) -> (ChannelHandle, mpsc::Receiver<ChannelNotice>, JoinHandle<()>) {
    let initial = ChannelState::new(clock.now_ms());
    let (state_tx, state_rx) = watch::channel(initial.clone());
    let (command_tx, command_rx) = mpsc::channel(8);
    let (notice_tx, notice_rx) = mpsc::channel(NOTICE_BUFFER);

    let staleness_period = Duration::from_millis(config.staleness_check_interval_ms.max(1));
    let mut staleness = interval_at(Instant::now() + staleness_period, staleness_period);
    staleness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let driver = Driver {
        url,
        config,
        clock,
        state: initial,
        state_tx,
        notices: notice_tx,
        socket: None,
        connecting: None,
        heartbeat: None,
        reconnect_at: None,
        staleness,
    };
    let task = tokio::spawn(driver.run(command_rx, cancel));

    let handle = ChannelHandle {
        commands: command_tx,
        state: state_rx,
    };
    (handle, notice_rx, task)
}

struct Driver {
    url: Url,
    config: ChannelConfig,
    clock: SessionClock,
    state: ChannelState,
    state_tx: watch::Sender<ChannelState>,
    notices: mpsc::Sender<ChannelNotice>,
    socket: Option<WsStream>,
    connecting: Option<PendingConnect>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
    staleness: Interval,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<ChannelCommand>, cancel: CancellationToken) {
        tracing::info!(url = %self.url, "realtime channel starting");
        self.apply(ChannelEvent::Connect).await;

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    self.apply(ChannelEvent::Teardown).await;
                    break;
                }
                Some(command) = commands.recv() => match command {
                    ChannelCommand::Reconnect => ChannelEvent::ManualReconnect,
                },
                result = pending_connect(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(ws) => {
                            self.socket = Some(ws);
                            ChannelEvent::Opened
                        }
                        Err(detail) => ChannelEvent::Errored { detail },
                    }
                }
                frame = next_frame(&mut self.socket) => match self.on_frame(frame) {
                    Some(event) => event,
                    None => continue,
                },
                () = next_tick(&mut self.heartbeat) => ChannelEvent::HeartbeatDue,
                _ = self.staleness.tick() => ChannelEvent::StalenessCheck,
                () = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    ChannelEvent::ReconnectDue
                }
            };
            self.apply(event).await;
        }

        tracing::info!("realtime channel stopped");
    }

    fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) -> Option<ChannelEvent> {
        match frame {
            None => {
                self.socket = None;
                Some(ChannelEvent::Closed {
                    reason: "stream ended".into(),
                })
            }
            Some(Err(e)) => {
                self.socket = None;
                Some(ChannelEvent::Errored {
                    detail: e.to_string(),
                })
            }
            Some(Ok(Message::Text(text))) => match decode(&text, self.clock.now()) {
                Ok(message) => Some(ChannelEvent::Message(message)),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable frame");
                    None
                }
            },
            Some(Ok(Message::Close(frame))) => {
                self.socket = None;
                let reason = frame.map_or_else(|| "close frame".to_string(), |f| f.reason.to_string());
                Some(ChannelEvent::Closed { reason })
            }
            Some(Ok(Message::Pong(_))) => Some(ChannelEvent::Message(InboundMessage::Pong)),
            // Protocol pings are answered by tungstenite.
            Some(Ok(Message::Ping(_) | Message::Binary(_) | Message::Frame(_))) => None,
        }
    }

    /// Feed one event through the state machine and run its effects. Effects
    /// that fail produce follow-up events, processed in order.
    async fn apply(&mut self, event: ChannelEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            tracing::trace!(?event, "channel event");
            let (next, effects) = transition(
                &self.state,
                event,
                &self.config,
                self.clock.now_ms(),
                self.clock.now(),
            );
            if next.phase != self.state.phase {
                tracing::debug!(from = ?self.state.phase, to = ?next.phase, "channel phase");
            }
            self.state = next;
            let published = self.state.clone();
            self.state_tx.send_if_modified(|current| {
                if *current == published {
                    false
                } else {
                    *current = published;
                    true
                }
            });

            for effect in effects {
                if let Some(follow_up) = self.run_effect(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn run_effect(&mut self, effect: ChannelEffect) -> Option<ChannelEvent> {
        match effect {
            ChannelEffect::OpenSocket => {
                self.socket = None;
                let url = self.url.to_string();
                let limit = Duration::from_millis(self.config.connect_timeout_ms.max(1));
                tracing::debug!(%url, "opening realtime channel");
                self.connecting = Some(Box::pin(async move {
                    match tokio::time::timeout(limit, connect_async(url)).await {
                        Ok(result) => result.map(|(ws, _response)| ws).map_err(|e| e.to_string()),
                        Err(_) => Err(format!("handshake timed out after {}ms", limit.as_millis())),
                    }
                }));
            }
            ChannelEffect::CloseSocket => {
                self.connecting = None;
                if let Some(mut ws) = self.socket.take() {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
                }
            }
            ChannelEffect::StartHeartbeat => {
                tracing::info!("realtime channel connected");
                let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
                let mut heartbeat = interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);
            }
            ChannelEffect::StopHeartbeat => self.heartbeat = None,
            ChannelEffect::SendPing => {
                if let Some(ws) = self.socket.as_mut()
                    && let Err(e) = ws.send(Message::Text(PING_TOKEN.to_string())).await
                {
                    self.socket = None;
                    return Some(ChannelEvent::Errored {
                        detail: e.to_string(),
                    });
                }
            }
            ChannelEffect::ScheduleReconnect { delay_ms, attempt } => {
                tracing::info!(attempt, delay_ms, "realtime channel lost, reconnect scheduled");
                self.reconnect_at = Some(Instant::now() + Duration::from_millis(delay_ms));
            }
            ChannelEffect::CancelReconnect => self.reconnect_at = None,
            ChannelEffect::Refetch(resource) => self.notify(ChannelNotice::Refetch(resource)).await,
            ChannelEffect::PatchStatus { agent_status, at } => {
                self.notify(ChannelNotice::PatchStatus { agent_status, at }).await;
            }
            ChannelEffect::AppendOutput(event) => self.notify(ChannelNotice::Output(event)).await,
            ChannelEffect::GaveUp { attempts } => {
                tracing::warn!(attempts, "realtime channel gave up reconnecting");
                self.notify(ChannelNotice::GaveUp { attempts }).await;
            }
        }
        None
    }

    async fn notify(&mut self, notice: ChannelNotice) {
        if self.notices.send(notice).await.is_err() {
            tracing::trace!("notice receiver dropped");
        }
    }
}

// ─── select! helpers ─────────────────────────────────────────────────
// Each resolves only when its resource exists, so absent resources simply
// never win the select.

async fn pending_connect(connecting: &mut Option<PendingConnect>) -> Result<WsStream, String> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agtdash_core::channel::ChannelPhase;
    use tokio::net::TcpListener;

    type ServerWs = WebSocketStream<TcpStream>;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            heartbeat_interval_ms: 10_000,
            staleness_check_interval_ms: 10_000,
            staleness_threshold_ms: 30_000,
            max_reconnect_attempts: 10,
            reconnect_base_ms: 20,
            reconnect_cap_ms: 100,
            connect_timeout_ms: 5_000,
        }
    }

    async fn listen() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerWs {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("client should connect")
            .expect("accept");
        tokio_tungstenite::accept_async(stream).await.expect("handshake")
    }

    async fn wait_for(handle: &ChannelHandle, pred: impl FnMut(&ChannelState) -> bool) -> ChannelState {
        let mut rx = handle.subscribe();
        let state = tokio::time::timeout(WAIT, rx.wait_for(pred))
            .await
            .expect("state reached in time")
            .expect("driver alive");
        state.clone()
    }

    async fn next_notice(rx: &mut mpsc::Receiver<ChannelNotice>) -> ChannelNotice {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("notice in time")
            .expect("driver alive")
    }

    #[tokio::test]
    async fn connects_and_dispatches_messages() {
        let (listener, url) = listen().await;
        let cancel = CancellationToken::new();
        let (handle, mut notices, task) =
            spawn_channel(url, fast_config(), SessionClock::start(), cancel.clone());

        let mut server = accept(&listener).await;
        wait_for(&handle, |s| s.raw_connected).await;

        server
            .send(Message::Text(r#"{"type":"todo_update"}"#.into()))
            .await
            .expect("send");
        assert_eq!(next_notice(&mut notices).await, ChannelNotice::Refetch(Resource::Tasks));

        server
            .send(Message::Text(
                r#"{"type":"agent_status_change","data":{"status":"running"}}"#.into(),
            ))
            .await
            .expect("send");
        let ChannelNotice::PatchStatus { agent_status, .. } = next_notice(&mut notices).await else {
            panic!("expected status patch");
        };
        assert_eq!(agent_status, "running");

        // Garbage is dropped without disturbing the channel.
        server.send(Message::Text("{oops".into())).await.expect("send");
        server
            .send(Message::Text(r#"{"type":"graph_update"}"#.into()))
            .await
            .expect("send");
        assert_eq!(next_notice(&mut notices).await, ChannelNotice::Refetch(Resource::Graph));

        cancel.cancel();
        tokio::time::timeout(WAIT, task).await.expect("stops").expect("join");
        assert_eq!(handle.state().phase, ChannelPhase::Closed);
    }

    #[tokio::test]
    async fn heartbeat_sends_ping_token() {
        let (listener, url) = listen().await;
        let cancel = CancellationToken::new();
        let config = ChannelConfig {
            heartbeat_interval_ms: 50,
            ..fast_config()
        };
        let (_handle, _notices, _task) = spawn_channel(url, config, SessionClock::start(), cancel.clone());

        let mut server = accept(&listener).await;
        let frame = tokio::time::timeout(WAIT, server.next())
            .await
            .expect("ping in time")
            .expect("frame")
            .expect("ok frame");
        assert_eq!(frame, Message::Text(PING_TOKEN.to_string()));
        cancel.cancel();
    }

    #[tokio::test]
    async fn reconnects_after_server_drop() {
        let (listener, url) = listen().await;
        let cancel = CancellationToken::new();
        let (handle, _notices, _task) =
            spawn_channel(url, fast_config(), SessionClock::start(), cancel.clone());

        let server = accept(&listener).await;
        wait_for(&handle, |s| s.raw_connected).await;
        drop(server);

        let _second = accept(&listener).await;
        let state = wait_for(&handle, |s| s.raw_connected).await;
        assert_eq!(state.reconnect_attempt, 0, "open resets the counter");
        assert!(!state.is_reconnecting);
        cancel.cancel();
    }

    #[tokio::test]
    async fn gives_up_when_server_is_unreachable() {
        let url = {
            let (listener, url) = listen().await;
            drop(listener);
            url
        };
        let cancel = CancellationToken::new();
        let config = ChannelConfig {
            max_reconnect_attempts: 2,
            reconnect_base_ms: 10,
            reconnect_cap_ms: 20,
            ..fast_config()
        };
        let (handle, mut notices, _task) = spawn_channel(url, config, SessionClock::start(), cancel.clone());

        assert_eq!(next_notice(&mut notices).await, ChannelNotice::GaveUp { attempts: 2 });
        assert_eq!(handle.state().phase, ChannelPhase::GivenUp);
        cancel.cancel();
    }

    #[tokio::test]
    async fn manual_reconnect_opens_a_fresh_socket() {
        let (listener, url) = listen().await;
        let cancel = CancellationToken::new();
        let (handle, _notices, _task) =
            spawn_channel(url, fast_config(), SessionClock::start(), cancel.clone());

        let _first = accept(&listener).await;
        wait_for(&handle, |s| s.raw_connected).await;

        assert!(handle.reconnect());
        let _second = accept(&listener).await;
        wait_for(&handle, |s| s.raw_connected).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn silent_server_triggers_staleness_reconnect() {
        let (listener, url) = listen().await;
        let cancel = CancellationToken::new();
        let config = ChannelConfig {
            staleness_check_interval_ms: 50,
            staleness_threshold_ms: 150,
            ..fast_config()
        };
        let (handle, _notices, _task) = spawn_channel(url, config, SessionClock::start(), cancel.clone());

        // Held open but never answers.
        let _silent = accept(&listener).await;
        wait_for(&handle, |s| s.raw_connected).await;

        let _fresh = accept(&listener).await;
        wait_for(&handle, |s| s.raw_connected).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn stalled_handshake_is_retried() {
        let (listener, url) = listen().await;
        let cancel = CancellationToken::new();
        let config = ChannelConfig {
            connect_timeout_ms: 300,
            ..fast_config()
        };
        let (handle, _notices, _task) = spawn_channel(url, config, SessionClock::start(), cancel.clone());

        // Accepts TCP but never answers the upgrade.
        let (_stalled, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("first attempt")
            .expect("accept");
        let state = wait_for(&handle, |s| s.is_reconnecting).await;
        assert!(state.reconnect_attempt >= 1);
        assert!(!state.raw_connected);

        let _second = accept(&listener).await;
        wait_for(&handle, |s| s.raw_connected).await;
        cancel.cancel();
    }
}
