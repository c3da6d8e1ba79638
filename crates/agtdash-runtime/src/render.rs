//! Plain-text formatters for the dashboard. All functions are pure so the
//! layout can be tested without a terminal.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use agtdash_client::DashboardSnapshot;
use agtdash_client::data_access::BackendHealth;
use agtdash_core::channel::{ChannelPhase, ChannelState};
use agtdash_core::health::{HealthPolicy, HealthState, ServiceHealthRecord};
use agtdash_core::types::{
    AgentStatus, KnowledgeGraph, OutputEvent, OutputKind, Resource, TaskList, TaskStatus,
};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

/// Resolve `--color` into a concrete on/off.
pub fn resolve_color(color: &str) -> bool {
    use std::io::IsTerminal;
    match color {
        "always" => true,
        "never" => false,
        _ => std::io::stdout().is_terminal(),
    }
}

fn paint(text: &str, code: &str, use_color: bool) -> String {
    if use_color {
        format!("{code}{text}{RESET}")
    } else {
        text.to_string()
    }
}

// ─── Connection ───────────────────────────────────────────────────

/// One-line connection banner. `connected` is the debounced flag; the
/// channel state supplies the detail while offline.
pub fn format_connection(connected: bool, channel: &ChannelState, use_color: bool) -> String {
    if connected {
        return paint("● live", GREEN, use_color);
    }
    let detail = match channel.phase {
        ChannelPhase::GivenUp => format!(
            "gave up after {} attempts, type r to reconnect",
            channel.reconnect_attempt
        ),
        ChannelPhase::Closed => "closed".to_string(),
        _ if channel.is_reconnecting => {
            format!("reconnecting, attempt {}", channel.reconnect_attempt)
        }
        ChannelPhase::Connecting => "connecting".to_string(),
        _ => "disconnected".to_string(),
    };
    let color = if channel.phase == ChannelPhase::GivenUp { RED } else { YELLOW };
    paint(&format!("○ offline ({detail})"), color, use_color)
}

// ─── Tasks ────────────────────────────────────────────────────────

fn status_marker(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => "✓",
        TaskStatus::InProgress => "▶",
        TaskStatus::Failed => "✗",
        TaskStatus::Pending => "·",
    }
}

fn status_color(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => GREEN,
        TaskStatus::InProgress => CYAN,
        TaskStatus::Failed => RED,
        TaskStatus::Pending => DIM,
    }
}

pub fn format_tasks(tasks: &TaskList, use_color: bool) -> String {
    if tasks.0.is_empty() {
        return "(no tasks)".to_string();
    }
    let mut out = String::new();
    for task in &tasks.0 {
        let marker = paint(status_marker(task.status), status_color(task.status), use_color);
        let _ = writeln!(out, "{marker} {} [{}]", task.description, task.status);
        for sub in &task.subtasks {
            let check = if sub.completed { "[x]" } else { "[ ]" };
            let _ = writeln!(out, "    {check} {}", sub.description);
        }
    }
    out.truncate(out.trim_end().len());
    out
}

// ─── Graph / status ───────────────────────────────────────────────

/// Node and link counts, with nodes grouped by type.
pub fn format_graph(graph: &KnowledgeGraph) -> String {
    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for node in &graph.nodes {
        *by_type.entry(node.node_type.as_str()).or_default() += 1;
    }
    let mut line = format!("{} nodes, {} links", graph.nodes.len(), graph.links.len());
    if !by_type.is_empty() {
        let groups: Vec<String> = by_type.iter().map(|(t, n)| format!("{t}:{n}")).collect();
        let _ = write!(line, " ({})", groups.join(" "));
    }
    line
}

pub fn format_status(status: &AgentStatus, use_color: bool) -> String {
    let agent_color = match status.agent_status.as_str() {
        "offline" | "error" => RED,
        "idle" => DIM,
        _ => CYAN,
    };
    format!(
        "agent {}  system {}  v{}  updated {}",
        paint(&status.agent_status, agent_color, use_color),
        status.system_status,
        status.version,
        status.last_updated,
    )
}

// ─── Output log ───────────────────────────────────────────────────

fn kind_prefix(kind: OutputKind) -> &'static str {
    match kind {
        OutputKind::Command => "$",
        OutputKind::Output => " ",
        OutputKind::Error => "!",
        OutputKind::Info => "i",
    }
}

/// Last `tail` events, oldest first.
pub fn format_log(events: &[OutputEvent], tail: usize, use_color: bool) -> String {
    let start = events.len().saturating_sub(tail);
    events[start..]
        .iter()
        .map(|event| {
            let time = event.timestamp.format("%H:%M:%S");
            let line = format!("{time} {} {}", kind_prefix(event.kind), event.content);
            match event.kind {
                OutputKind::Error => paint(&line, RED, use_color),
                OutputKind::Command => paint(&line, BOLD, use_color),
                _ => line,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Health ───────────────────────────────────────────────────────

pub fn format_health(
    records: &BTreeMap<Resource, ServiceHealthRecord>,
    policy: &HealthPolicy,
    use_color: bool,
) -> String {
    if records.is_empty() {
        return "(no requests yet)".to_string();
    }
    records
        .iter()
        .map(|(resource, record)| {
            let state = record.state(policy);
            let (label, color) = match state {
                HealthState::Healthy => ("healthy", GREEN),
                HealthState::Degraded => ("degraded", YELLOW),
                HealthState::Fallback => ("fallback", RED),
            };
            format!(
                "{:<9}{}  failures {}  checked {}",
                resource.as_str(),
                paint(&format!("{label:<9}"), color, use_color),
                record.fail_count,
                record.last_check_at.format("%H:%M:%S"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_backend_health(health: &BackendHealth) -> String {
    let status = match health.status.as_str() {
        "" => "unknown",
        s => s,
    };
    let mut out = format!("backend: {status}");
    for (component, status) in &health.components {
        let _ = write!(out, "\n  {component:<12}{status}");
    }
    out
}

// ─── Full view ────────────────────────────────────────────────────

fn heading(title: &str, use_color: bool) -> String {
    paint(&format!("── {title} "), BOLD, use_color)
}

/// Everything `agtdash watch` draws, top to bottom.
pub fn format_dashboard(
    snapshot: &DashboardSnapshot,
    policy: &HealthPolicy,
    tail: usize,
    use_color: bool,
) -> String {
    let sections = [
        format_connection(snapshot.connected, &snapshot.channel, use_color),
        format_status(&snapshot.status, use_color),
        heading("tasks", use_color),
        format_tasks(&snapshot.tasks, use_color),
        heading("graph", use_color),
        format_graph(&snapshot.graph),
        heading("health", use_color),
        format_health(&snapshot.health, policy, use_color),
        heading("output", use_color),
        format_log(&snapshot.log, tail, use_color),
    ];
    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use agtdash_core::types::{GraphLink, GraphNode, Subtask, Task, TerminalHistory};
    use chrono::{TimeZone, Utc};

    fn at(secs: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs).single().expect("valid time")
    }

    fn task(id: &str, status: TaskStatus, subtasks: Vec<Subtask>) -> Task {
        Task {
            id: id.to_string(),
            description: format!("do {id}"),
            status,
            created: String::new(),
            updated: String::new(),
            subtasks,
        }
    }

    fn offline_status() -> AgentStatus {
        AgentStatus {
            agent_status: "offline".into(),
            system_status: "unavailable".into(),
            last_updated: "never".into(),
            version: "unknown".into(),
        }
    }

    #[test]
    fn connection_live() {
        let text = format_connection(true, &ChannelState::default(), false);
        assert_eq!(text, "● live");
    }

    #[test]
    fn connection_reconnecting_shows_attempt() {
        let channel = ChannelState {
            is_reconnecting: true,
            reconnect_attempt: 3,
            ..ChannelState::default()
        };
        let text = format_connection(false, &channel, false);
        assert_eq!(text, "○ offline (reconnecting, attempt 3)");
    }

    #[test]
    fn connection_given_up_hints_manual_reconnect() {
        let channel = ChannelState {
            phase: ChannelPhase::GivenUp,
            reconnect_attempt: 10,
            ..ChannelState::default()
        };
        let text = format_connection(false, &channel, false);
        assert!(text.contains("gave up after 10 attempts"));
        assert!(text.contains("type r"));
    }

    #[test]
    fn tasks_with_subtasks() {
        let tasks = TaskList(vec![
            task(
                "task-1",
                TaskStatus::InProgress,
                vec![
                    Subtask { id: "task-1-1".into(), description: "first".into(), completed: true },
                    Subtask { id: "task-1-2".into(), description: "second".into(), completed: false },
                ],
            ),
            task("task-2", TaskStatus::Completed, vec![]),
        ]);
        let text = format_tasks(&tasks, false);
        assert_eq!(
            text,
            "▶ do task-1 [in progress]\n    [x] first\n    [ ] second\n✓ do task-2 [completed]"
        );
    }

    #[test]
    fn tasks_empty() {
        assert_eq!(format_tasks(&TaskList::default(), false), "(no tasks)");
    }

    #[test]
    fn no_ansi_without_color() {
        let tasks = TaskList(vec![task("task-1", TaskStatus::Failed, vec![])]);
        assert!(!format_tasks(&tasks, false).contains('\x1b'));
        assert!(format_tasks(&tasks, true).contains(RED));
    }

    #[test]
    fn graph_groups_node_types() {
        let node = |id: &str, t: &str| GraphNode {
            id: id.into(),
            name: id.into(),
            node_type: t.into(),
        };
        let graph = KnowledgeGraph {
            nodes: vec![node("a", "agent"), node("t1", "task"), node("t2", "task")],
            links: vec![GraphLink { source: "a".into(), target: "t1".into(), value: 1.0 }],
        };
        assert_eq!(format_graph(&graph), "3 nodes, 1 links (agent:1 task:2)");
        assert_eq!(format_graph(&KnowledgeGraph::default()), "0 nodes, 0 links");
    }

    #[test]
    fn status_line() {
        let text = format_status(&offline_status(), false);
        assert_eq!(text, "agent offline  system unavailable  vunknown  updated never");
    }

    #[test]
    fn log_tail_keeps_newest() {
        let events: Vec<OutputEvent> = (0..5)
            .map(|i| OutputEvent::new(OutputKind::Output, format!("line {i}"), at(i)))
            .collect();
        let text = format_log(&events, 2, false);
        assert_eq!(text, "12:00:03   line 3\n12:00:04   line 4");
        assert_eq!(format_log(&events, 0, false), "");
        assert_eq!(format_log(&events, 50, false).lines().count(), 5);
    }

    #[test]
    fn log_prefixes_by_kind() {
        let events = vec![
            OutputEvent::new(OutputKind::Command, "build", at(0)),
            OutputEvent::new(OutputKind::Error, "boom", at(1)),
        ];
        let text = format_log(&events, 10, false);
        assert_eq!(text, "12:00:00 $ build\n12:00:01 ! boom");
    }

    #[test]
    fn health_table_states() {
        let policy = HealthPolicy::default();
        let mut records = BTreeMap::new();
        records.insert(Resource::Tasks, ServiceHealthRecord::healthy(at(0)));
        records.insert(
            Resource::Graph,
            ServiceHealthRecord { healthy: false, last_check_at: at(5), fail_count: 1 },
        );
        records.insert(
            Resource::Status,
            ServiceHealthRecord { healthy: false, last_check_at: at(9), fail_count: 3 },
        );
        let text = format_health(&records, &policy, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("tasks") && lines[0].contains("healthy"));
        assert!(lines[1].starts_with("graph") && lines[1].contains("degraded"));
        assert!(lines[2].starts_with("status") && lines[2].contains("fallback"));
        assert!(lines[2].contains("failures 3"));
    }

    #[test]
    fn backend_health_lists_components() {
        let mut health = BackendHealth {
            status: "ok".into(),
            ..BackendHealth::default()
        };
        health.components.insert("db".into(), "ok".into());
        assert_eq!(format_backend_health(&health), "backend: ok\n  db          ok");
        assert_eq!(format_backend_health(&BackendHealth::default()), "backend: unknown");
    }

    #[test]
    fn dashboard_has_every_section() {
        let snapshot = DashboardSnapshot {
            tasks: TaskList::default(),
            graph: KnowledgeGraph::default(),
            status: offline_status(),
            terminal: TerminalHistory::default(),
            log: vec![OutputEvent::new(OutputKind::Info, "hello", at(0))],
            connected: false,
            channel: ChannelState::default(),
            health: BTreeMap::new(),
        };
        let text = format_dashboard(&snapshot, &HealthPolicy::default(), 5, false);
        for needle in ["offline", "── tasks", "── graph", "── health", "── output", "hello"] {
            assert!(text.contains(needle), "missing {needle}");
        }
    }
}
