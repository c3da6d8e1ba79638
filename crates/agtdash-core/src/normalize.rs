//! Response shape normalization and synthetic fallback payloads.
//!
//! Every readable resource implements [`ResourcePayload`]: how to turn a raw
//! JSON body into the typed payload, what to show when nothing better is
//! available, and how to move between the typed payload and the cache's
//! [`ResourceData`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::message::parse_timestamp;
use crate::outline::parse_outline;
use crate::types::{
    AgentStatus, GraphLink, GraphNode, KnowledgeGraph, OutputEvent, OutputKind, ParseError,
    Resource, ResourceData, Subtask, Task, TaskList, TaskStatus, TerminalHistory,
};

pub trait ResourcePayload: Sized + Clone + Send + 'static {
    const RESOURCE: Resource;

    /// Normalize a response body. `now` stamps fields the body leaves out.
    fn from_response(value: &Value, now: DateTime<Utc>) -> Result<Self, ParseError>;

    /// Synthetic data shown when neither the network nor the cache can help.
    fn fallback(now: DateTime<Utc>) -> Self;

    fn into_data(self) -> ResourceData;

    fn from_data(data: &ResourceData) -> Option<Self>;
}

// ─── Tasks ───────────────────────────────────────────────────────────

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawTask {
    id: Option<Value>,
    description: String,
    #[serde(alias = "title")]
    name: Option<String>,
    status: Option<String>,
    created: Option<String>,
    updated: Option<String>,
    subtasks: Vec<RawSubtask>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawSubtask {
    id: Option<Value>,
    description: String,
    completed: bool,
}

fn id_string(id: Option<&Value>, fallback: impl FnOnce() -> String) -> String {
    match id {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => fallback(),
    }
}

fn task_from_raw(raw: RawTask, index: usize, stamp: &str) -> Task {
    let id = id_string(raw.id.as_ref(), || format!("task-{}", index + 1));
    let subtasks = raw
        .subtasks
        .into_iter()
        .enumerate()
        .map(|(j, s)| Subtask {
            id: id_string(s.id.as_ref(), || format!("{id}-{}", j + 1)),
            description: s.description,
            completed: s.completed,
        })
        .collect();
    let description = if raw.description.is_empty() {
        raw.name.unwrap_or_default()
    } else {
        raw.description
    };
    Task {
        status: raw.status.as_deref().map_or(TaskStatus::Pending, TaskStatus::infer),
        created: raw.created.unwrap_or_else(|| stamp.to_string()),
        updated: raw.updated.unwrap_or_else(|| stamp.to_string()),
        id,
        description,
        subtasks,
    }
}

fn tasks_from_array(items: &[Value], stamp: &str) -> Result<Vec<Task>, ParseError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let raw = RawTask::deserialize(item)
                .map_err(|e| ParseError::Shape(format!("task {i}: {e}")))?;
            Ok(task_from_raw(raw, i, stamp))
        })
        .collect()
}

impl ResourcePayload for TaskList {
    const RESOURCE: Resource = Resource::Tasks;

    fn from_response(value: &Value, now: DateTime<Utc>) -> Result<Self, ParseError> {
        let stamp = now.to_rfc3339();
        if let Some(items) = value.as_array() {
            return tasks_from_array(items, &stamp).map(TaskList);
        }
        if let Some(items) = value.get("tasks").and_then(Value::as_array) {
            return tasks_from_array(items, &stamp).map(TaskList);
        }
        if let Some(content) = value.get("content").and_then(Value::as_str) {
            return Ok(TaskList(parse_outline(content, now)));
        }
        Err(ParseError::Shape(
            "expected task array, {tasks}, or {content}".into(),
        ))
    }

    fn fallback(now: DateTime<Utc>) -> Self {
        let stamp = now.to_rfc3339();
        TaskList(vec![Task {
            id: "task-offline".into(),
            description: "Waiting for the agent backend".into(),
            status: TaskStatus::Pending,
            created: stamp.clone(),
            updated: stamp,
            subtasks: vec![
                Subtask {
                    id: "task-offline-1".into(),
                    description: "Check that the server is running".into(),
                    completed: false,
                },
                Subtask {
                    id: "task-offline-2".into(),
                    description: "Reconnect with `r`".into(),
                    completed: false,
                },
            ],
        }])
    }

    fn into_data(self) -> ResourceData {
        ResourceData::Tasks(self)
    }

    fn from_data(data: &ResourceData) -> Option<Self> {
        match data {
            ResourceData::Tasks(t) => Some(t.clone()),
            _ => None,
        }
    }
}

// ─── Graph ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawNode {
    id: Value,
    name: Option<String>,
    label: Option<String>,
    #[serde(rename = "type")]
    node_type: Option<String>,
}

#[derive(Deserialize)]
struct RawLink {
    source: Value,
    target: Value,
    value: Option<f64>,
}

fn endpoint(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        // Some renderers replace endpoints with the node object itself.
        Value::Object(map) => map.get("id").map(endpoint).unwrap_or_default(),
        other => other.to_string(),
    }
}

impl ResourcePayload for KnowledgeGraph {
    const RESOURCE: Resource = Resource::Graph;

    fn from_response(value: &Value, _now: DateTime<Utc>) -> Result<Self, ParseError> {
        let nodes = value
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::Shape("graph without nodes".into()))?;
        let links = value
            .get("links")
            .or_else(|| value.get("edges"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let nodes = nodes
            .iter()
            .map(|n| {
                let raw = RawNode::deserialize(n).map_err(|e| ParseError::Shape(e.to_string()))?;
                let id = endpoint(&raw.id);
                Ok(GraphNode {
                    name: raw.name.or(raw.label).unwrap_or_else(|| id.clone()),
                    node_type: raw.node_type.unwrap_or_else(|| "unknown".into()),
                    id,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;
        let links = links
            .iter()
            .map(|l| {
                let raw = RawLink::deserialize(l).map_err(|e| ParseError::Shape(e.to_string()))?;
                Ok(GraphLink {
                    source: endpoint(&raw.source),
                    target: endpoint(&raw.target),
                    value: raw.value.unwrap_or(1.0),
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(KnowledgeGraph { nodes, links })
    }

    fn fallback(_now: DateTime<Utc>) -> Self {
        let node = |id: &str, name: &str, node_type: &str| GraphNode {
            id: id.into(),
            name: name.into(),
            node_type: node_type.into(),
        };
        let link = |source: &str, target: &str| GraphLink {
            source: source.into(),
            target: target.into(),
            value: 1.0,
        };
        KnowledgeGraph {
            nodes: vec![
                node("agent", "Agent", "agent"),
                node("tasks", "Tasks", "task"),
                node("context", "Context", "context"),
            ],
            links: vec![link("agent", "tasks"), link("agent", "context")],
        }
    }

    fn into_data(self) -> ResourceData {
        ResourceData::Graph(self)
    }

    fn from_data(data: &ResourceData) -> Option<Self> {
        match data {
            ResourceData::Graph(g) => Some(g.clone()),
            _ => None,
        }
    }
}

// ─── Status ──────────────────────────────────────────────────────────

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_str)
}

impl ResourcePayload for AgentStatus {
    const RESOURCE: Resource = Resource::Status;

    fn from_response(value: &Value, now: DateTime<Utc>) -> Result<Self, ParseError> {
        if !value.is_object() {
            return Err(ParseError::Shape("status must be an object".into()));
        }
        let agent_status = str_at(value, &["agentStatus"])
            .or_else(|| str_at(value, &["agent", "status"]))
            .ok_or_else(|| ParseError::Shape("status without agent state".into()))?;
        let system_status = str_at(value, &["systemStatus"])
            .or_else(|| str_at(value, &["system", "status"]))
            .or_else(|| str_at(value, &["system", "backend_status"]))
            .unwrap_or("unknown");
        let last_updated = str_at(value, &["lastUpdated"])
            .map(str::to_string)
            .or_else(|| parse_timestamp(value.get("timestamp")).map(|t| t.to_rfc3339()))
            .unwrap_or_else(|| now.to_rfc3339());
        let version = str_at(value, &["version"]).unwrap_or("unknown");

        Ok(AgentStatus {
            agent_status: agent_status.to_string(),
            system_status: system_status.to_string(),
            last_updated,
            version: version.to_string(),
        })
    }

    fn fallback(now: DateTime<Utc>) -> Self {
        AgentStatus {
            agent_status: "offline".into(),
            system_status: "unavailable".into(),
            last_updated: now.to_rfc3339(),
            version: "unknown".into(),
        }
    }

    fn into_data(self) -> ResourceData {
        ResourceData::Status(self)
    }

    fn from_data(data: &ResourceData) -> Option<Self> {
        match data {
            ResourceData::Status(s) => Some(s.clone()),
            _ => None,
        }
    }
}

// ─── Terminal history ────────────────────────────────────────────────

impl ResourcePayload for TerminalHistory {
    const RESOURCE: Resource = Resource::Terminal;

    fn from_response(value: &Value, now: DateTime<Utc>) -> Result<Self, ParseError> {
        if value.is_array() {
            return Vec::<OutputEvent>::deserialize(value)
                .map(TerminalHistory)
                .map_err(|e| ParseError::Shape(e.to_string()));
        }
        let at = parse_timestamp(value.get("timestamp")).unwrap_or(now);
        let Some(history) = value
            .get("terminal")
            .and_then(|t| t.get("history"))
            .and_then(Value::as_array)
        else {
            return Err(ParseError::Shape("status without terminal history".into()));
        };

        let mut events = Vec::with_capacity(history.len() * 2);
        for entry in history {
            if let Some(command) = entry.get("command").and_then(Value::as_str) {
                events.push(OutputEvent::new(OutputKind::Command, command, at));
            }
            if let Some(output) = entry.get("output").and_then(Value::as_str) {
                events.push(OutputEvent::new(OutputKind::Output, output, at));
            }
        }
        Ok(TerminalHistory(events))
    }

    fn fallback(_now: DateTime<Utc>) -> Self {
        TerminalHistory::default()
    }

    fn into_data(self) -> ResourceData {
        ResourceData::Terminal(self)
    }

    fn from_data(data: &ResourceData) -> Option<Self> {
        match data {
            ResourceData::Terminal(t) => Some(t.clone()),
            _ => None,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
