//! Request Executor: one logical HTTP call with timeout and retry.
//!
//! The executor knows nothing about service health; callers record the
//! outcome. The wire sits behind [`Transport`] so tests can script it.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

use agtdash_core::backoff::RetryPolicy;
use agtdash_core::types::Resource;
use reqwest::Url;
use serde_json::Value;

use crate::config::{RequestOptions, as_directory};
use crate::error::{NetworkError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// One HTTP round-trip. Enables mock injection for testing.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

// ─── reqwest transport ───────────────────────────────────────────────

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = match request.method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Post => self.client.post(request.url.clone()),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

// ─── Executor ────────────────────────────────────────────────────────

pub struct RequestExecutor<T> {
    transport: T,
    base_url: Url,
    retry: RetryPolicy,
    defaults: RequestOptions,
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T, base_url: Url, retry: RetryPolicy, defaults: RequestOptions) -> Self {
        Self {
            transport,
            base_url: as_directory(base_url),
            retry,
            defaults,
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn defaults(&self) -> RequestOptions {
        self.defaults
    }

    /// Call `resource` with the default options.
    pub async fn execute(
        &self,
        resource: Resource,
        method: Method,
        payload: Option<Value>,
    ) -> Result<Value, NetworkError> {
        self.execute_with(resource, method, payload, self.defaults).await
    }

    pub async fn execute_with(
        &self,
        resource: Resource,
        method: Method,
        payload: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, NetworkError> {
        self.call(resource.as_str(), resource.path(), method, payload, options)
            .await
    }

    /// Call an arbitrary path. `target` names the call in logs and errors.
    pub async fn call(
        &self,
        target: &str,
        path: &str,
        method: Method,
        payload: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, NetworkError> {
        let url = match self.base_url.join(path.trim_start_matches('/')) {
            Ok(url) => url,
            Err(e) => {
                return Err(NetworkError {
                    target: target.to_string(),
                    attempts: 0,
                    source: TransportError::InvalidUrl(format!("{path}: {e}")),
                });
            }
        };
        let request = HttpRequest {
            method,
            url,
            body: payload,
        };

        let mut attempt: u32 = 0;
        loop {
            let cause = match self.attempt(request.clone(), options.timeout).await {
                Ok(value) => return Ok(value),
                Err(cause) => cause,
            };
            let attempts = attempt.saturating_add(1);
            if !cause.is_retryable() || attempt >= options.max_retries {
                tracing::warn!(
                    target_name = target,
                    method = request.method.as_str(),
                    attempts,
                    error = %cause,
                    "request failed"
                );
                return Err(NetworkError {
                    target: target.to_string(),
                    attempts,
                    source: cause,
                });
            }
            let delay = self.retry.delay(attempt, jitter(self.retry.max_jitter));
            tracing::debug!(
                target_name = target,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %cause,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
            attempt = attempts;
        }
    }

    async fn attempt(&self, request: HttpRequest, timeout: Duration) -> Result<Value, TransportError> {
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        if !(200..300).contains(&response.status) {
            return Err(TransportError::Status {
                status: response.status,
                body: response.body,
            });
        }
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Uniform-ish jitter in `[0, max)`, seeded from `RandomState`.
fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let random = RandomState::new().build_hasher().finish();
    Duration::from_millis(random % max_ms)
}

// ─── Test support ────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testing::{Reply, ScriptedTransport};
    use super::*;
    use serde_json::json;

    fn executor(transport: &ScriptedTransport) -> RequestExecutor<ScriptedTransport> {
        RequestExecutor::new(
            transport.clone(),
            Url::parse("http://dash.test").expect("url"),
            RetryPolicy::default(),
            RequestOptions::default(),
        )
    }

    fn refused() -> Reply {
        Reply::Fail(TransportError::Connect("refused".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_json() {
        let transport = ScriptedTransport::default();
        transport.route("/graph", [Reply::Json(200, json!({"nodes": []}))]);
        let value = executor(&transport)
            .execute(Resource::Graph, Method::Get, None)
            .await
            .expect("ok");
        assert_eq!(value, json!({"nodes": []}));
        assert_eq!(transport.requests()[0].url.as_str(), "http://dash.test/graph");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let transport = ScriptedTransport::default();
        transport.route("/todos", [refused(), Reply::Json(200, json!([]))]);
        let value = executor(&transport)
            .execute(Resource::Tasks, Method::Get, None)
            .await
            .expect("ok");
        assert_eq!(value, json!([]));
        assert_eq!(transport.count("/todos"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries_with_last_cause() {
        let transport = ScriptedTransport::default();
        transport.route(
            "/status",
            [
                refused(),
                refused(),
                Reply::Raw(503, "unavailable"),
            ],
        );
        let err = executor(&transport)
            .execute(Resource::Status, Method::Get, None)
            .await
            .expect_err("must fail");
        assert_eq!(err.attempts, 3);
        assert_eq!(err.target, "status");
        assert_eq!(
            err.source,
            TransportError::Status {
                status: 503,
                body: "unavailable".into()
            }
        );
        assert_eq!(transport.count("/status"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_sleeps_follow_backoff() {
        let transport = ScriptedTransport::default();
        transport.route("/graph", [refused()]);
        let start = tokio::time::Instant::now();
        let _ = executor(&transport)
            .execute(Resource::Graph, Method::Get, None)
            .await;
        // 500ms + 1000ms of backoff, plus under 250ms of jitter each.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1_500), "waited {waited:?}");
        assert!(waited < Duration::from_millis(2_000), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let transport = ScriptedTransport::default();
        transport.route("/graph", [Reply::Hang]);
        let options = RequestOptions {
            max_retries: 0,
            timeout: Duration::from_millis(8_000),
        };
        let err = executor(&transport)
            .execute_with(Resource::Graph, Method::Get, None, options)
            .await
            .expect_err("must time out");
        assert_eq!(err.source, TransportError::Timeout(Duration::from_millis(8_000)));
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_json_body_is_not_retried() {
        let transport = ScriptedTransport::default();
        transport.route("/graph", [Reply::Raw(200, "<html>")]);
        let err = executor(&transport)
            .execute(Resource::Graph, Method::Get, None)
            .await
            .expect_err("must fail");
        assert!(matches!(err.source, TransportError::Decode(_)));
        assert_eq!(transport.count("/graph"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn post_carries_payload() {
        let transport = ScriptedTransport::default();
        transport.route("/execute", [Reply::Json(202, json!({"message": "started"}))]);
        executor(&transport)
            .execute(Resource::Execute, Method::Post, Some(json!({"task": "ls"})))
            .await
            .expect("ok");
        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.body, Some(json!({"task": "ls"})));
    }

    #[test]
    fn jitter_stays_below_bound() {
        for _ in 0..200 {
            assert!(jitter(Duration::from_millis(250)) < Duration::from_millis(250));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}
