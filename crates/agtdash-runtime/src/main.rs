//! agtdash: terminal client for the agent dashboard backend.

use clap::Parser;

mod cli;
mod cmd_exec;
mod cmd_status;
mod cmd_watch;
mod render;

/// `AGTDASH_LOG`, then `RUST_LOG`, then `default`. Logs go to stderr.
fn init_tracing(default: &str) {
    let filter = std::env::var("AGTDASH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config = args.client.to_config();

    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Watch(cli::WatchOpts::default()));

    match command {
        cli::Command::Watch(opts) => {
            init_tracing("warn");
            cmd_watch::cmd_watch(config, &opts).await?;
        }
        cli::Command::Exec(opts) => {
            init_tracing("info");
            cmd_exec::cmd_exec(&config, &opts.task, opts.json).await?;
        }
        cli::Command::Status(opts) => {
            init_tracing("info");
            cmd_status::cmd_status(&config, opts.json, &opts.color).await?;
        }
        cli::Command::Health(opts) => {
            init_tracing("info");
            cmd_status::cmd_health(&config, opts.json).await?;
        }
        cli::Command::Model(opts) => {
            init_tracing("info");
            cmd_exec::cmd_model(&config, &opts.name).await?;
        }
    }

    Ok(())
}
