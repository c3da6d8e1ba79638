use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Resource ─────────────────────────────────────────────────────

/// Named backend resource. Health and cache state are tracked per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Tasks,
    Graph,
    Status,
    Terminal,
    Execute,
    Model,
}

impl Resource {
    pub const ALL: [Self; 6] = [
        Self::Tasks,
        Self::Graph,
        Self::Status,
        Self::Terminal,
        Self::Execute,
        Self::Model,
    ];

    /// Resources the dashboard reads and caches.
    pub const READABLE: [Self; 4] = [Self::Tasks, Self::Graph, Self::Status, Self::Terminal];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Graph => "graph",
            Self::Status => "status",
            Self::Terminal => "terminal",
            Self::Execute => "execute",
            Self::Model => "model",
        }
    }

    /// HTTP path serving this resource, relative to the server origin.
    ///
    /// Terminal history has no endpoint of its own; it is carried inside
    /// the `/status` payload.
    pub fn path(self) -> &'static str {
        match self {
            Self::Tasks => "/todos",
            Self::Graph => "/graph",
            Self::Status | Self::Terminal => "/status",
            Self::Execute => "/execute",
            Self::Model => "/model",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tasks" | "todos" => Ok(Self::Tasks),
            "graph" => Ok(Self::Graph),
            "status" => Ok(Self::Status),
            "terminal" => Ok(Self::Terminal),
            "execute" => Ok(Self::Execute),
            "model" => Ok(Self::Model),
            _ => Err(ParseError::UnknownResource(s.to_string())),
        }
    }
}

// ─── Tasks ────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Infer a status from free text such as a bracketed marker or a
    /// section heading. Unmatched text is `Pending`.
    pub fn infer(text: &str) -> Self {
        let lower = text.trim().to_ascii_lowercase();
        if lower == "x" || lower.contains("complete") || lower.contains("done") {
            Self::Completed
        } else if lower.contains("progress") || lower.contains("active") {
            Self::InProgress
        } else if lower.contains("error") || lower.contains("issue") || lower.contains("fail") {
            Self::Failed
        } else {
            Self::Pending
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub created: String,
    pub updated: String,
    pub subtasks: Vec<Subtask>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskList(pub Vec<Task>);

// ─── Knowledge graph ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    pub value: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

// ─── Agent status ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub agent_status: String,
    pub system_status: String,
    pub last_updated: String,
    pub version: String,
}

// ─── Output events ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Command,
    Output,
    Error,
    Info,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Output => "output",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

/// One line of terminal / log output shown in the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub kind: OutputKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl OutputEvent {
    pub fn new(kind: OutputKind, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminalHistory(pub Vec<OutputEvent>);

// ─── Cached payloads ──────────────────────────────────────────────

/// Normalized payload of one readable resource, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource", content = "data", rename_all = "lowercase")]
pub enum ResourceData {
    Tasks(TaskList),
    Graph(KnowledgeGraph),
    Status(AgentStatus),
    Terminal(TerminalHistory),
}

impl ResourceData {
    pub fn resource(&self) -> Resource {
        match self {
            Self::Tasks(_) => Resource::Tasks,
            Self::Graph(_) => Resource::Graph,
            Self::Status(_) => Resource::Status,
            Self::Terminal(_) => Resource::Terminal,
        }
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("unexpected payload shape: {0}")]
    Shape(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

// ─── Tests ────────────────────────────────────────────────────────
