//! `agtdash status` and `agtdash health`: one-shot reads without the
//! realtime channel.

use agtdash_client::ClientConfig;
use agtdash_client::clock::SessionClock;
use agtdash_client::data_access::DataAccess;
use agtdash_core::types::{AgentStatus, KnowledgeGraph, TaskList, TerminalHistory};

use crate::render;

/// Entry point for `agtdash status`.
pub async fn cmd_status(config: &ClientConfig, json: bool, color: &str) -> anyhow::Result<()> {
    let data = DataAccess::from_config(config, SessionClock::start())?;
    let (tasks, graph, status, terminal) = tokio::join!(
        data.get::<TaskList>(true),
        data.get::<KnowledgeGraph>(true),
        data.get::<AgentStatus>(true),
        data.get::<TerminalHistory>(true),
    );
    let health = data.health_snapshot();

    if json {
        let out = serde_json::json!({
            "server": data.base_url(),
            "tasks": tasks,
            "graph": graph,
            "status": status,
            "terminal": terminal,
            "health": health,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let use_color = render::resolve_color(color);
    println!("{}", render::format_status(&status, use_color));
    println!("\n{}", render::format_tasks(&tasks, use_color));
    println!("\ngraph: {}", render::format_graph(&graph));
    if !terminal.0.is_empty() {
        println!("\n{}", render::format_log(&terminal.0, terminal.0.len(), use_color));
    }
    println!("\n{}", render::format_health(&health, &config.health, use_color));
    Ok(())
}

/// Entry point for `agtdash health`.
pub async fn cmd_health(config: &ClientConfig, json: bool) -> anyhow::Result<()> {
    let data = DataAccess::from_config(config, SessionClock::start())?;
    let health = data.check_backend().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        println!("{}", render::format_backend_health(&health));
    }
    Ok(())
}
