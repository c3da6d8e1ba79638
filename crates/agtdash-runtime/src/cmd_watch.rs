//! `agtdash watch`: live dashboard driven by session change notifications.

use std::io::Write as _;

use agtdash_client::{ClientConfig, DashboardSession};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::WatchOpts;
use crate::render::{format_dashboard, resolve_color};

/// A line typed on stdin.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Reconnect,
    Quit,
    Task(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "" => Input::Empty,
        "r" => Input::Reconnect,
        "q" => Input::Quit,
        task => Input::Task(task.to_string()),
    }
}

/// Entry point for `agtdash watch`.
pub async fn cmd_watch(config: ClientConfig, opts: &WatchOpts) -> anyhow::Result<()> {
    let use_color = resolve_color(&opts.color);
    let policy = config.health.clone();
    let session = DashboardSession::start(config).await?;
    let mut changes = session.changes();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        // Clear screen + cursor home
        print!("\x1b[2J\x1b[H");
        println!("{}", format_dashboard(&session.snapshot(), &policy, opts.tail, use_color));
        let footer = "agtdash watch: r reconnect, q quit, other text runs a task";
        if use_color {
            println!("\n\x1b[2m{footer}\x1b[0m");
        } else {
            println!("\n{footer}");
        }
        print!("> ");
        std::io::stdout().flush()?;

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_input(&line) {
                    Input::Quit => break,
                    Input::Reconnect => {
                        if !session.reconnect() {
                            tracing::warn!("channel task is gone; reconnect ignored");
                        }
                    }
                    Input::Task(task) => {
                        // Failures are already recorded in the output log.
                        if let Err(e) = session.execute_task(task).await {
                            tracing::debug!(error = %e, "task submission failed");
                        }
                    }
                    Input::Empty => {}
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    Ok(())
}
