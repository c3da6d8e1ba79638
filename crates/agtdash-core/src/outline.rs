//! Outline parser for free-form task text.
//!
//! The backend can serve its task file verbatim (`{"content": "..."}`), e.g.
//!
//! ```text
//! ## Active Tasks
//! * [In Progress] Write docs
//!   * [x] Draft outline
//!   * [ ] Review
//! ```
//!
//! A bullet (`*`, `-`, `+`) at indent 0 opens a task and a bullet at indent 2
//! adds a subtask to the open task. Anything else is skipped.

use chrono::{DateTime, Utc};

use crate::types::{Subtask, Task, TaskStatus};

const CHECKMARKS: [char; 4] = ['✓', '✔', '✅', '☑'];

pub fn parse_outline(text: &str, now: DateTime<Utc>) -> Vec<Task> {
    let stamp = now.to_rfc3339();
    let mut tasks: Vec<Task> = Vec::new();
    let mut section = TaskStatus::Pending;
    // Index into `tasks` of the task that subtasks attach to.
    let mut open: Option<usize> = None;

    for line in text.lines() {
        let (indent, rest) = split_indent(line);
        if rest.is_empty() {
            continue;
        }

        if let Some(heading) = rest.strip_prefix('#') {
            section = TaskStatus::infer(heading.trim_start_matches('#'));
            open = None;
            continue;
        }

        let Some(item) = bullet_body(rest) else {
            continue;
        };
        let (marker, description) = split_marker(item);
        if description.is_empty() {
            continue;
        }

        match indent {
            0 => {
                let status = marker.map_or(section, TaskStatus::infer);
                tasks.push(Task {
                    id: format!("task-{}", tasks.len() + 1),
                    description: description.to_string(),
                    status,
                    created: stamp.clone(),
                    updated: stamp.clone(),
                    subtasks: Vec::new(),
                });
                open = Some(tasks.len() - 1);
            }
            2 => {
                let Some(task) = open.and_then(|i| tasks.get_mut(i)) else {
                    continue;
                };
                let checked = marker.is_some_and(|m| m.eq_ignore_ascii_case("x"))
                    || item.contains(CHECKMARKS);
                task.subtasks.push(Subtask {
                    id: format!("{}-{}", task.id, task.subtasks.len() + 1),
                    description: strip_checkmarks(description).to_string(),
                    completed: checked || task.status == TaskStatus::Completed,
                });
            }
            _ => {}
        }
    }

    tasks
}

/// Leading indentation width (a tab counts as two) and the remainder.
fn split_indent(line: &str) -> (usize, &str) {
    let mut width = 0;
    for (i, c) in line.char_indices() {
        match c {
            ' ' => width += 1,
            '\t' => width += 2,
            _ => return (width, line[i..].trim_end()),
        }
    }
    (width, "")
}

fn bullet_body(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    let marker = chars.next()?;
    if !matches!(marker, '*' | '-' | '+') {
        return None;
    }
    let body = chars.as_str();
    if !body.is_empty() && !body.starts_with(char::is_whitespace) {
        return None;
    }
    Some(body.trim_start())
}

/// Split a leading `[...]` marker from the description.
fn split_marker(item: &str) -> (Option<&str>, &str) {
    if let Some(inner) = item.strip_prefix('[')
        && let Some(end) = inner.find(']')
    {
        return (Some(inner[..end].trim()), inner[end + 1..].trim());
    }
    (None, item.trim())
}

fn strip_checkmarks(description: &str) -> &str {
    description
        .trim_start_matches(CHECKMARKS)
        .trim_end_matches(CHECKMARKS)
        .trim()
}
