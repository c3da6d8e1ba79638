//! Client configuration.

use std::time::Duration;

use agtdash_core::backoff::RetryPolicy;
use agtdash_core::channel::ChannelConfig;
use agtdash_core::health::HealthPolicy;
use agtdash_core::output_log::DEFAULT_LOG_CAPACITY;
use agtdash_core::stabilizer::StabilizerConfig;
use reqwest::Url;

use crate::error::ConfigError;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Per-call request options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server origin, e.g. `http://127.0.0.1:8000`. A trailing slash is
    /// ignored.
    pub server: String,
    pub request: RequestOptions,
    pub retry: RetryPolicy,
    pub health: HealthPolicy,
    pub channel: ChannelConfig,
    pub stabilizer: StabilizerConfig,
    /// Interval of the polling safety net. `None` disables it.
    pub poll_interval: Option<Duration>,
    pub log_capacity: usize,
    /// Model sent along with every task submission.
    pub model: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            request: RequestOptions::default(),
            retry: RetryPolicy::default(),
            health: HealthPolicy::default(),
            channel: ChannelConfig::default(),
            stabilizer: StabilizerConfig::default(),
            poll_interval: Some(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            log_capacity: DEFAULT_LOG_CAPACITY,
            model: None,
        }
    }
}

impl ClientConfig {
    /// Validated server origin. The path always ends in `/` so endpoint
    /// paths join beneath it.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |detail: String| ConfigError::InvalidServerUrl {
            url: self.server.clone(),
            detail,
        };
        let url = Url::parse(self.server.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host".into()));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed".into()));
        }
        Ok(as_directory(url))
    }

    /// Realtime channel endpoint: `https` maps to `wss`, `http` to `ws`.
    pub fn ws_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.base_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| ConfigError::InvalidServerUrl {
            url: self.server.clone(),
            detail: format!("cannot switch to {scheme}"),
        })?;
        url.join("ws").map_err(|e| ConfigError::InvalidServerUrl {
            url: self.server.clone(),
            detail: e.to_string(),
        })
    }
}

/// Append a trailing `/` to the path if it is missing.
pub(crate) fn as_directory(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
