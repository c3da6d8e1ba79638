//! Dashboard session: one instance per running client.
//!
//! Owns the Data Access Layer, the channel driver, the stabilizer, the
//! polling safety net and the output log, and publishes a revision counter
//! that views watch to know when to redraw. Nothing here is global, so tests
//! build as many isolated sessions as they like.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use agtdash_core::channel::ChannelState;
use agtdash_core::health::ServiceHealthRecord;
use agtdash_core::normalize::ResourcePayload;
use agtdash_core::output_log::OutputLog;
use agtdash_core::types::{
    AgentStatus, KnowledgeGraph, OutputEvent, OutputKind, Resource, TaskList, TerminalHistory,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::channel::{ChannelHandle, ChannelNotice, spawn_channel};
use crate::clock::SessionClock;
use crate::config::ClientConfig;
use crate::data_access::{DataAccess, ExecuteReceipt, TaskInput};
use crate::error::{CommandError, ConfigError};
use crate::executor::{ReqwestTransport, Transport};
use crate::poller::spawn_poller;
use crate::stabilizer::spawn_stabilizer;

/// Everything a view needs to draw one frame.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub tasks: TaskList,
    pub graph: KnowledgeGraph,
    pub status: AgentStatus,
    pub terminal: TerminalHistory,
    pub log: Vec<OutputEvent>,
    /// Debounced connection flag.
    pub connected: bool,
    pub channel: ChannelState,
    pub health: BTreeMap<Resource, ServiceHealthRecord>,
}

struct Resources {
    tasks: TaskList,
    graph: KnowledgeGraph,
    status: AgentStatus,
    terminal: TerminalHistory,
}

struct Shared<T> {
    data: DataAccess<T>,
    resources: Mutex<Resources>,
    log: Mutex<OutputLog>,
    revision: watch::Sender<u64>,
    clock: SessionClock,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> Shared<T> {
    fn bump(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    fn append(&self, event: OutputEvent) {
        lock(&self.log).push(event);
        self.bump();
    }

    fn info(&self, kind: OutputKind, content: impl Into<String>) {
        self.append(OutputEvent::new(kind, content, self.clock.now()));
    }

    async fn load<R: ResourcePayload>(&self, force: bool, store: impl FnOnce(&mut Resources, R)) {
        let value = self.data.get::<R>(force).await;
        store(&mut lock(&self.resources), value);
        self.bump();
    }

    async fn refresh(&self, resource: Resource, force: bool) {
        match resource {
            Resource::Tasks => self.load(force, |r, v: TaskList| r.tasks = v).await,
            Resource::Graph => self.load(force, |r, v: KnowledgeGraph| r.graph = v).await,
            Resource::Status => self.load(force, |r, v: AgentStatus| r.status = v).await,
            Resource::Terminal => self.load(force, |r, v: TerminalHistory| r.terminal = v).await,
            Resource::Execute | Resource::Model => {}
        }
    }

    async fn refresh_all(&self, force: bool) {
        tokio::join!(
            self.refresh(Resource::Tasks, force),
            self.refresh(Resource::Graph, force),
            self.refresh(Resource::Status, force),
            self.refresh(Resource::Terminal, force),
        );
    }

    fn patch_status(&self, agent_status: String, at: DateTime<Utc>) {
        {
            let mut resources = lock(&self.resources);
            resources.status.agent_status = agent_status;
            resources.status.last_updated = at.to_rfc3339();
        }
        self.bump();
    }
}

pub struct DashboardSession<T = ReqwestTransport> {
    shared: Arc<Shared<T>>,
    channel: ChannelHandle,
    stable: watch::Receiver<bool>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    tasks: Vec<JoinHandle<()>>,
}

impl DashboardSession<ReqwestTransport> {
    pub async fn start(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::with_transport(config, ReqwestTransport::default()).await
    }
}

impl<T: Transport> DashboardSession<T> {
    /// Build the session, fetch every read resource once and start the
    /// background tasks.
    pub async fn with_transport(config: ClientConfig, transport: T) -> Result<Self, ConfigError> {
        let clock = SessionClock::start();
        let ws_url = config.ws_url()?;
        let data = DataAccess::with_transport(&config, transport, clock)?;
        let now = clock.now();
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            data,
            resources: Mutex::new(Resources {
                tasks: TaskList::fallback(now),
                graph: KnowledgeGraph::fallback(now),
                status: AgentStatus::fallback(now),
                terminal: TerminalHistory::fallback(now),
            }),
            log: Mutex::new(OutputLog::with_capacity(config.log_capacity)),
            revision,
            clock,
        });

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut tasks = Vec::new();

        let (channel, notices, channel_task) =
            spawn_channel(ws_url, config.channel.clone(), clock, cancel.child_token());
        tasks.push(channel_task);

        let (stable, stabilizer_task) =
            spawn_stabilizer(channel.subscribe(), config.stabilizer, clock, cancel.child_token());
        tasks.push(stabilizer_task);

        tasks.push(spawn_view_bridge(
            Arc::clone(&shared),
            channel.subscribe(),
            stable.clone(),
            cancel.child_token(),
        ));
        tasks.push(spawn_notice_handler(
            Arc::clone(&shared),
            notices,
            tracker.clone(),
            cancel.child_token(),
        ));

        if let Some(period) = config.poll_interval {
            let poll_shared = Arc::clone(&shared);
            tasks.push(spawn_poller(period, cancel.child_token(), move || {
                let shared = Arc::clone(&poll_shared);
                async move { shared.refresh_all(false).await }
            }));
        }

        shared.refresh_all(false).await;
        tracing::info!(server = %shared.data.base_url(), "dashboard session started");

        Ok(Self {
            shared,
            channel,
            stable,
            cancel,
            tracker,
            tasks,
        })
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let (tasks, graph, status, terminal) = {
            let r = lock(&self.shared.resources);
            (
                r.tasks.clone(),
                r.graph.clone(),
                r.status.clone(),
                r.terminal.clone(),
            )
        };
        DashboardSnapshot {
            tasks,
            graph,
            status,
            terminal,
            log: lock(&self.shared.log).iter().cloned().collect(),
            connected: *self.stable.borrow(),
            channel: self.channel.state(),
            health: self.shared.data.health_snapshot(),
        }
    }

    /// Bumped whenever anything in the snapshot may have changed.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub fn reconnect(&self) -> bool {
        self.shared.info(OutputKind::Info, "Reconnecting realtime channel");
        self.channel.reconnect()
    }

    pub async fn refresh(&self, resource: Resource, force: bool) {
        self.shared.refresh(resource, force).await;
    }

    pub async fn refresh_all(&self, force: bool) {
        self.shared.refresh_all(force).await;
    }

    /// Submit a task, log it, and refresh the resources it affects.
    pub async fn execute_task(&self, input: impl Into<TaskInput>) -> Result<ExecuteReceipt, CommandError> {
        let input = input.into();
        let echo = match &input {
            TaskInput::Text(text) if text.trim().is_empty() => return Err(CommandError::EmptyTask),
            TaskInput::Text(text) => text.trim().to_string(),
            TaskInput::Structured(value) => value.to_string(),
        };
        self.shared.info(OutputKind::Command, echo);

        match self.shared.data.execute_task(input).await {
            Ok(receipt) => {
                if let Some(message) = &receipt.message {
                    self.shared.info(OutputKind::Info, message.clone());
                }
                tokio::join!(
                    self.shared.refresh(Resource::Tasks, true),
                    self.shared.refresh(Resource::Status, true),
                );
                Ok(receipt)
            }
            Err(err) => {
                self.shared.info(OutputKind::Error, format!("Task failed: {err}"));
                Err(err)
            }
        }
    }

    pub async fn set_model(&self, name: &str) -> Result<String, CommandError> {
        let result = self.shared.data.set_model(name).await;
        match &result {
            Ok(message) => self.shared.info(OutputKind::Info, message.clone()),
            Err(err) => self.shared.info(OutputKind::Error, format!("Model change failed: {err}")),
        }
        result
    }

    pub fn data(&self) -> &DataAccess<T> {
        &self.shared.data
    }

    /// Cancel every background task and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "session task failed");
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("dashboard session stopped");
    }
}

/// Bumps the revision whenever the channel or the stable flag changes.
fn spawn_view_bridge<T: Transport>(
    shared: Arc<Shared<T>>,
    mut channel: watch::Receiver<ChannelState>,
    mut stable: watch::Receiver<bool>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                result = channel.changed() => if result.is_err() { break },
                result = stable.changed() => if result.is_err() { break },
            }
            shared.bump();
        }
    })
}

fn spawn_notice_handler<T: Transport>(
    shared: Arc<Shared<T>>,
    mut notices: mpsc::Receiver<ChannelNotice>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let notice = tokio::select! {
                () = cancel.cancelled() => break,
                notice = notices.recv() => match notice {
                    Some(notice) => notice,
                    None => break,
                },
            };
            match notice {
                ChannelNotice::Refetch(resource) => {
                    let shared = Arc::clone(&shared);
                    let cancel = cancel.clone();
                    tracker.spawn(async move {
                        tokio::select! {
                            () = cancel.cancelled() => {}
                            () = shared.refresh(resource, true) => {}
                        }
                    });
                }
                ChannelNotice::PatchStatus { agent_status, at } => {
                    shared.patch_status(agent_status, at);
                }
                ChannelNotice::Output(event) => shared.append(event),
                ChannelNotice::GaveUp { attempts } => shared.info(
                    OutputKind::Error,
                    format!("Realtime connection lost after {attempts} reconnect attempts; press r to retry"),
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{Reply, ScriptedTransport};
    use futures_util::SinkExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        session: DashboardSession<ScriptedTransport>,
        transport: ScriptedTransport,
        listener: TcpListener,
    }

    async fn harness() -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let transport = ScriptedTransport::default();
        transport.route("/todos", [Reply::Json(200, json!({"content": "* first\n"}))]);
        transport.route(
            "/graph",
            [Reply::Json(200, json!({"nodes": [{"id": "a", "name": "A", "type": "task"}], "links": []}))],
        );
        transport.route(
            "/status",
            [Reply::Json(
                200,
                json!({
                    "agent": {"status": "idle"},
                    "system": {"backend_status": "healthy"},
                    "terminal": {"history": [{"command": "ls", "output": "a.txt"}]},
                    "version": "2.1.0"
                }),
            )],
        );
        let config = ClientConfig {
            server: format!("http://{addr}"),
            poll_interval: None,
            ..ClientConfig::default()
        };
        let session = DashboardSession::with_transport(config, transport.clone())
            .await
            .expect("session");
        Harness {
            session,
            transport,
            listener,
        }
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("client should connect")
            .expect("accept");
        tokio_tungstenite::accept_async(stream).await.expect("handshake")
    }

    async fn until(session: &DashboardSession<ScriptedTransport>, mut pred: impl FnMut(&DashboardSnapshot) -> bool) {
        let mut changes = session.changes();
        tokio::time::timeout(WAIT, async {
            while !pred(&session.snapshot()) {
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .expect("condition reached in time");
    }

    #[tokio::test]
    async fn start_loads_every_resource() {
        let h = harness().await;
        let snap = h.session.snapshot();
        assert_eq!(snap.tasks.0[0].description, "first");
        assert_eq!(snap.graph.nodes[0].id, "a");
        assert_eq!(snap.status.agent_status, "idle");
        assert_eq!(snap.terminal.0.len(), 2);
        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn invalidation_triggers_forced_refetch() {
        let h = harness().await;
        let mut server = accept(&h.listener).await;
        until(&h.session, |s| s.channel.raw_connected).await;

        h.transport
            .route("/todos", [Reply::Json(200, json!({"content": "* second\n"}))]);
        server
            .send(Message::Text(r#"{"type":"todo_update"}"#.into()))
            .await
            .expect("send");
        until(&h.session, |s| s.tasks.0.first().is_some_and(|t| t.description == "second")).await;
        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn status_change_patches_without_request() {
        let h = harness().await;
        let mut server = accept(&h.listener).await;
        until(&h.session, |s| s.connected).await;
        let before = h.transport.count("/status");

        server
            .send(Message::Text(
                r#"{"type":"agent_status_change","data":{"status":"running"}}"#.into(),
            ))
            .await
            .expect("send");
        until(&h.session, |s| s.status.agent_status == "running").await;
        assert_eq!(h.transport.count("/status"), before);
        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn log_lines_reach_the_output_log() {
        let h = harness().await;
        let mut server = accept(&h.listener).await;
        until(&h.session, |s| s.channel.raw_connected).await;

        server
            .send(Message::Text(r#"{"type":"terminal_output","data":{"output":"compiled"}}"#.into()))
            .await
            .expect("send");
        until(&h.session, |s| s.log.iter().any(|e| e.content == "compiled")).await;
        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn execute_logs_and_refreshes_tasks_and_status() {
        let h = harness().await;
        h.transport
            .route("/execute", [Reply::Json(202, json!({"message": "Task execution started"}))]);
        let todos = h.transport.count("/todos");
        let status = h.transport.count("/status");

        h.session.execute_task("build it").await.expect("accepted");

        assert_eq!(h.transport.count("/todos"), todos + 1);
        assert_eq!(h.transport.count("/status"), status + 1);
        let log = h.session.snapshot().log;
        assert!(log.iter().any(|e| e.kind == OutputKind::Command && e.content == "build it"));
        assert!(log.iter().any(|e| e.content == "Task execution started"));
        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn failed_execute_is_reported() {
        let h = harness().await;
        h.transport.route("/execute", [Reply::Raw(400, "bad request")]);
        let err = h.session.execute_task("x").await.expect_err("must fail");
        assert!(matches!(err, CommandError::Network(_)));
        let log = h.session.snapshot().log;
        assert!(log.iter().any(|e| e.kind == OutputKind::Error));
        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn blank_task_is_rejected_without_echo() {
        let h = harness().await;
        let err = h.session.execute_task("   ").await.expect_err("must fail");
        assert_eq!(err, CommandError::EmptyTask);
        let log = h.session.snapshot().log;
        assert!(log.iter().all(|e| e.kind != OutputKind::Command && e.kind != OutputKind::Error));
        assert_eq!(h.transport.count("/execute"), 0);
        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_the_channel() {
        let h = harness().await;
        let _server = accept(&h.listener).await;
        until(&h.session, |s| s.channel.raw_connected).await;
        let channel = h.session.channel.subscribe();
        tokio::time::timeout(WAIT, h.session.shutdown())
            .await
            .expect("shutdown in time");
        assert!(!channel.borrow().raw_connected);
    }
}
