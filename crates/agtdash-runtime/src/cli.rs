//! CLI definition using clap derive.

use std::time::Duration;

use agtdash_client::ClientConfig;
use agtdash_client::config::{
    DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SERVER, DEFAULT_TIMEOUT_MS,
    RequestOptions,
};
use agtdash_core::output_log::DEFAULT_LOG_CAPACITY;
use agtdash_core::stabilizer::{
    DEFAULT_CONNECT_DELAY_MS, DEFAULT_DISCONNECT_DELAY_MS, StabilizerConfig,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agtdash", about = "Resilient terminal client for the agent dashboard")]
pub struct Cli {
    #[command(flatten)]
    pub client: ClientOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Live dashboard (default). Type `r` to reconnect, `q` to quit, anything else runs as a task
    Watch(WatchOpts),
    /// Submit a task to the agent
    Exec(ExecOpts),
    /// Fetch every resource once and print it
    Status(StatusOpts),
    /// Query the backend /health endpoint
    Health(HealthOpts),
    /// Switch the agent's model
    Model(ModelOpts),
}

/// Connection settings shared by every subcommand.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct ClientOpts {
    /// Backend origin (http or https)
    #[arg(long, short = 's', global = true, env = "AGTDASH_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Per-attempt request timeout in milliseconds
    #[arg(long, global = true, env = "AGTDASH_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Retries after the first failed request attempt
    #[arg(long, global = true, env = "AGTDASH_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Polling safety net interval in seconds (0 disables)
    #[arg(long, global = true, env = "AGTDASH_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,

    /// Grace period before showing "disconnected"
    #[arg(long, global = true, env = "AGTDASH_DISCONNECT_DELAY_MS", default_value_t = DEFAULT_DISCONNECT_DELAY_MS)]
    pub disconnect_delay_ms: u64,

    /// Delay before showing "connected"
    #[arg(long, global = true, env = "AGTDASH_CONNECT_DELAY_MS", default_value_t = DEFAULT_CONNECT_DELAY_MS)]
    pub connect_delay_ms: u64,

    /// Maximum lines kept in the output log
    #[arg(long, global = true, env = "AGTDASH_LOG_CAPACITY", default_value_t = DEFAULT_LOG_CAPACITY)]
    pub log_capacity: usize,

    /// Model sent along with every task
    #[arg(long, global = true, env = "AGTDASH_MODEL")]
    pub model: Option<String>,
}

impl ClientOpts {
    pub fn to_config(&self) -> ClientConfig {
        ClientConfig {
            server: self.server.clone(),
            request: RequestOptions {
                max_retries: self.max_retries,
                timeout: Duration::from_millis(self.timeout_ms),
            },
            stabilizer: StabilizerConfig {
                disconnect_delay_ms: self.disconnect_delay_ms,
                connect_delay_ms: self.connect_delay_ms,
            },
            poll_interval: (self.poll_interval_secs > 0)
                .then(|| Duration::from_secs(self.poll_interval_secs)),
            log_capacity: self.log_capacity,
            model: self.model.clone(),
            ..ClientConfig::default()
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct WatchOpts {
    /// Number of output log lines to show
    #[arg(long, default_value = "12")]
    pub tail: usize,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

impl Default for WatchOpts {
    fn default() -> Self {
        Self {
            tail: 12,
            color: "auto".to_string(),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExecOpts {
    /// Task text; words are joined with spaces
    #[arg(required = true, trailing_var_arg = true)]
    pub task: Vec<String>,

    /// Print the server's receipt as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StatusOpts {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct HealthOpts {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ModelOpts {
    /// Model name, e.g. `gpt-4o`
    pub name: String,
}
