//! Realtime channel message decoding.
//!
//! Inbound frames are decoded once, at the channel boundary, into
//! [`InboundMessage`]. Expected shapes:
//!
//! ```json
//! "pong"
//! {"type": "pong", "timestamp": 1740441600.5}
//! {"type": "todo_update", "data": {...}}
//! {"type": "agent_status_change", "data": {"status": "running"}}
//! {"type": "terminal_output", "data": {"output": "..."}}
//! {"message": "free-form log line"}
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::types::{OutputEvent, OutputKind, ParseError};

/// Bare heartbeat token sent by the client.
pub const PING_TOKEN: &str = "ping";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Ping,
    Pong,
    /// Terminal activity. `None` when the frame carried no printable content.
    TerminalUpdate(Option<OutputEvent>),
    TodoUpdate(Option<OutputEvent>),
    GraphUpdate(Option<OutputEvent>),
    StatusUpdate(Option<OutputEvent>),
    TaskUpdate(Option<OutputEvent>),
    AgentStatusChange {
        status: String,
        log: Option<OutputEvent>,
    },
    /// Untyped or unknown-typed payload that still carries printable content.
    Log(OutputEvent),
    /// Anything else, including acknowledgements such as `message_received`.
    Unrecognized { kind: Option<String> },
}

impl InboundMessage {
    /// Printable line carried by the message, if any.
    pub fn log_line(&self) -> Option<&OutputEvent> {
        match self {
            Self::TerminalUpdate(log)
            | Self::TodoUpdate(log)
            | Self::GraphUpdate(log)
            | Self::StatusUpdate(log)
            | Self::TaskUpdate(log)
            | Self::AgentStatusChange { log, .. } => log.as_ref(),
            Self::Log(event) => Some(event),
            Self::Ping | Self::Pong | Self::Unrecognized { .. } => None,
        }
    }

    /// Whether the frame counts as a heartbeat for staleness detection.
    pub fn refreshes_heartbeat(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong | Self::Unrecognized { .. })
    }
}

/// Decode one text frame. `now` stamps events whose payload has no usable
/// timestamp.
pub fn decode(text: &str, now: DateTime<Utc>) -> Result<InboundMessage, ParseError> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("ping") {
        return Ok(InboundMessage::Ping);
    }
    if trimmed.eq_ignore_ascii_case("pong") {
        return Ok(InboundMessage::Pong);
    }

    let value: Value = serde_json::from_str(trimmed)?;
    if !value.is_object() {
        return Err(ParseError::Shape(format!("expected object, got {value}")));
    }
    let timestamp = parse_timestamp(value.get("timestamp")).unwrap_or(now);
    let kind = value.get("type").and_then(Value::as_str);

    let message = match kind {
        Some("ping") => InboundMessage::Ping,
        Some("pong") => InboundMessage::Pong,
        Some(k) if k.starts_with("terminal_") => {
            let output_kind = match k {
                "terminal_command" => OutputKind::Command,
                "terminal_error" => OutputKind::Error,
                "terminal_status" => OutputKind::Info,
                _ => OutputKind::Output,
            };
            InboundMessage::TerminalUpdate(
                terminal_content(&value).map(|c| OutputEvent::new(output_kind, c, timestamp)),
            )
        }
        Some(k) if k.starts_with("todo_") => InboundMessage::TodoUpdate(log_event(&value, timestamp)),
        Some("task_update" | "task_start" | "task_complete") => {
            InboundMessage::TaskUpdate(log_event(&value, timestamp))
        }
        Some("graph_update") => InboundMessage::GraphUpdate(log_event(&value, timestamp)),
        Some("status_update") => InboundMessage::StatusUpdate(log_event(&value, timestamp)),
        Some("agent_status_change") => {
            let status = field_str(&value, "status")
                .or_else(|| value.get("data").and_then(|d| field_str(d, "status")))
                .unwrap_or("unknown")
                .to_string();
            InboundMessage::AgentStatusChange {
                status,
                log: log_event(&value, timestamp),
            }
        }
        other => match log_event(&value, timestamp) {
            Some(event) => InboundMessage::Log(event),
            None => InboundMessage::Unrecognized {
                kind: other.map(str::to_string),
            },
        },
    };
    Ok(message)
}

/// Extract a log-shaped line: `message` / `content` / `output`, at the top
/// level or under `data`.
fn log_event(value: &Value, timestamp: DateTime<Utc>) -> Option<OutputEvent> {
    let (field, content) = log_field(value).or_else(|| value.get("data").and_then(log_field))?;
    let is_error = value.get("type").and_then(Value::as_str) == Some("error")
        || value.get("level").and_then(Value::as_str) == Some("error");
    let kind = if is_error {
        OutputKind::Error
    } else if field == "output" {
        OutputKind::Output
    } else {
        OutputKind::Info
    };
    Some(OutputEvent::new(kind, content, timestamp))
}

fn log_field(value: &Value) -> Option<(&'static str, &str)> {
    ["message", "content", "output"]
        .into_iter()
        .find_map(|field| field_str(value, field).map(|s| (field, s)))
}

fn terminal_content(value: &Value) -> Option<String> {
    let data = value.get("data").unwrap_or(value);
    if let Some(command) = field_str(data, "command") {
        return Some(command.to_string());
    }
    if let Some((_, content)) = log_field(data) {
        return Some(content.to_string());
    }
    field_str(data, "error").map(str::to_string)
}

fn field_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Accepts unix seconds (the backend sends `time.time()` floats) or RFC 3339.
pub(crate) fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() || secs < 0.0 {
                return None;
            }
            #[expect(clippy::cast_possible_truncation)]
            let millis = (secs * 1000.0) as i64;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-25T00:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn bare_tokens_are_heartbeats() {
        assert_eq!(decode("pong", now()), Ok(InboundMessage::Pong));
        assert_eq!(decode(" PING\n", now()), Ok(InboundMessage::Ping));
    }

    #[test]
    fn typed_heartbeat() {
        let msg = decode(r#"{"type":"pong","timestamp":1740441600.5}"#, now()).expect("decode");
        assert_eq!(msg, InboundMessage::Pong);
        assert!(msg.refreshes_heartbeat());
    }

    #[test]
    fn invalidation_kinds() {
        assert!(matches!(
            decode(r#"{"type":"todo_update"}"#, now()),
            Ok(InboundMessage::TodoUpdate(None))
        ));
        assert!(matches!(
            decode(r#"{"type":"todo_task_added","data":{"task_id":"1"}}"#, now()),
            Ok(InboundMessage::TodoUpdate(None))
        ));
        assert!(matches!(
            decode(r#"{"type":"graph_update"}"#, now()),
            Ok(InboundMessage::GraphUpdate(None))
        ));
        assert!(matches!(
            decode(r#"{"type":"task_complete","data":{"task":"x"}}"#, now()),
            Ok(InboundMessage::TaskUpdate(None))
        ));
    }

    #[test]
    fn status_update_carries_log_line() {
        let msg = decode(
            r#"{"type":"status_update","data":{"message":"Verifying overall task completion..."}}"#,
            now(),
        )
        .expect("decode");
        let InboundMessage::StatusUpdate(Some(event)) = msg else {
            panic!("expected status update with log, got {msg:?}");
        };
        assert_eq!(event.kind, OutputKind::Info);
        assert_eq!(event.content, "Verifying overall task completion...");
    }

    #[test]
    fn agent_status_change_reads_nested_status() {
        let msg = decode(
            r#"{"type":"agent_status_change","data":{"status":"running"}}"#,
            now(),
        )
        .expect("decode");
        assert_eq!(
            msg,
            InboundMessage::AgentStatusChange {
                status: "running".into(),
                log: None
            }
        );
    }

    #[test]
    fn terminal_frames_map_to_output_kinds() {
        let msg = decode(
            r#"{"type":"terminal_command","timestamp":1740441600,"data":{"command":"ls -la"}}"#,
            now(),
        )
        .expect("decode");
        let InboundMessage::TerminalUpdate(Some(event)) = msg else {
            panic!("expected terminal update, got {msg:?}");
        };
        assert_eq!(event.kind, OutputKind::Command);
        assert_eq!(event.content, "ls -la");
        assert_eq!(event.timestamp.timestamp(), 1_740_441_600);

        let msg = decode(
            r#"{"type":"terminal_error","data":{"error":"timed out","type":"timeout"}}"#,
            now(),
        )
        .expect("decode");
        assert!(matches!(
            msg,
            InboundMessage::TerminalUpdate(Some(OutputEvent { kind: OutputKind::Error, .. }))
        ));
    }

    #[test]
    fn untyped_payload_with_content_is_a_log() {
        let msg = decode(r#"{"data":{"output":"build ok"}}"#, now()).expect("decode");
        assert_eq!(
            msg,
            InboundMessage::Log(OutputEvent::new(OutputKind::Output, "build ok", now()))
        );
    }

    #[test]
    fn error_type_is_logged_as_error() {
        let msg = decode(r#"{"type":"error","data":{"message":"boom"}}"#, now()).expect("decode");
        assert!(matches!(
            msg,
            InboundMessage::Log(OutputEvent { kind: OutputKind::Error, .. })
        ));
    }

    #[test]
    fn acknowledgement_is_unrecognized() {
        let msg = decode(r#"{"type":"message_received","data":"hello"}"#, now()).expect("decode");
        assert_eq!(
            msg,
            InboundMessage::Unrecognized {
                kind: Some("message_received".into())
            }
        );
        assert!(msg.refreshes_heartbeat());
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(decode("{not json", now()), Err(ParseError::Json(_))));
        assert!(matches!(decode("[1,2]", now()), Err(ParseError::Shape(_))));
    }

    #[test]
    fn rfc3339_timestamps_accepted() {
        let msg = decode(
            r#"{"message":"hi","timestamp":"2026-01-01T00:00:00Z"}"#,
            now(),
        )
        .expect("decode");
        let InboundMessage::Log(event) = msg else {
            panic!("expected log");
        };
        assert_eq!(event.timestamp.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }
}
