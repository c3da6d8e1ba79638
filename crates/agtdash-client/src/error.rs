//! Error types for the client IO boundary.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("response body is not JSON: {0}")]
    Decode(String),

    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Decode and URL failures repeat identically, so they are not retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Decode(_) | Self::InvalidUrl(_))
    }
}

/// A request that failed after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{target} failed after {attempts} attempt(s): {source}")]
pub struct NetworkError {
    pub target: String,
    pub attempts: u32,
    #[source]
    pub source: TransportError,
}

/// Failure on the command (write) path, surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("task is empty")]
    EmptyTask,

    #[error("model name is empty")]
    EmptyModel,

    #[error("invalid command payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid server url {url:?}: {detail}")]
    InvalidServerUrl { url: String, detail: String },
}
