//! Data Access Layer: executor + health tracker + cache, per resource.
//!
//! Read paths never fail. The order of preference is fresh cache, network,
//! stale cache of any age, then synthetic defaults. The command path
//! (`execute_task`, `set_model`) propagates its errors.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use agtdash_core::cache::{CommitOutcome, ResponseCache};
use agtdash_core::health::{ServiceHealthRecord, ServiceHealthTracker};
use agtdash_core::normalize::ResourcePayload;
use agtdash_core::types::Resource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::clock::SessionClock;
use crate::config::{ClientConfig, RequestOptions};
use crate::error::{CommandError, ConfigError, NetworkError};
use crate::executor::{Method, ReqwestTransport, RequestExecutor, Transport};

/// Input to [`DataAccess::execute_task`].
#[derive(Debug, Clone, PartialEq)]
pub enum TaskInput {
    /// Free text, sent as `{"task": text}`.
    Text(String),
    /// A ready-made request body, sent as-is.
    Structured(Value),
}

impl From<&str> for TaskInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for TaskInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for TaskInput {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

/// Acknowledgement returned by `POST /execute`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteReceipt {
    pub message: Option<String>,
    pub task: Option<String>,
    pub model: Option<String>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendHealth {
    pub status: String,
    pub components: BTreeMap<String, String>,
}

struct State {
    health: ServiceHealthTracker,
    cache: ResponseCache,
}

pub struct DataAccess<T = ReqwestTransport> {
    executor: RequestExecutor<T>,
    state: Mutex<State>,
    clock: SessionClock,
    model: Option<String>,
}

impl DataAccess<ReqwestTransport> {
    pub fn from_config(config: &ClientConfig, clock: SessionClock) -> Result<Self, ConfigError> {
        Self::with_transport(config, ReqwestTransport::default(), clock)
    }
}

impl<T: Transport> DataAccess<T> {
    pub fn with_transport(config: &ClientConfig, transport: T, clock: SessionClock) -> Result<Self, ConfigError> {
        let executor = RequestExecutor::new(
            transport,
            config.base_url()?,
            config.retry.clone(),
            config.request,
        );
        let state = State {
            health: ServiceHealthTracker::new(config.health.clone(), clock.now()),
            cache: ResponseCache::default(),
        };
        Ok(Self {
            executor,
            state: Mutex::new(state),
            clock,
            model: config.model.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a read resource. Never fails; see the module docs for the
    /// order of preference.
    pub async fn get<R: ResourcePayload>(&self, force_refresh: bool) -> R {
        let resource = R::RESOURCE;
        let now = self.clock.now();

        let ticket = {
            let mut state = self.state();
            let in_fallback = state.health.is_in_fallback(resource);
            if !force_refresh
                && state.cache.is_valid(resource, in_fallback, now)
                && let Some(data) = state.cache.get(resource).and_then(R::from_data)
            {
                return data;
            }
            if in_fallback && !state.health.try_begin_recheck(resource, now) {
                tracing::debug!(%resource, "circuit open, serving fallback");
                None
            } else {
                if in_fallback {
                    tracing::info!(%resource, "probing resource in fallback");
                }
                Some(state.cache.begin(resource))
            }
        };

        if let Some(ticket) = ticket {
            let result = self.executor.execute(resource, Method::Get, None).await;
            let now = self.clock.now();
            let parsed = match result {
                Ok(body) => R::from_response(&body, now).map_err(|e| {
                    tracing::warn!(%resource, error = %e, "unexpected response shape");
                }),
                Err(_) => Err(()),
            };

            let mut state = self.state();
            match parsed {
                Ok(data) => {
                    state.health.record_success(resource, now);
                    if state.cache.commit(ticket, data.clone().into_data(), now)
                        == CommitOutcome::Superseded
                    {
                        tracing::debug!(%resource, "dropping response superseded by a newer request");
                    }
                    return data;
                }
                Err(()) => state.health.record_failure(resource, now),
            }
        }

        let state = self.state();
        match state.cache.get(resource).and_then(R::from_data) {
            Some(stale) => stale,
            None => R::fallback(self.clock.now()),
        }
    }

    /// Submit a task to the agent.
    pub async fn execute_task(&self, input: impl Into<TaskInput>) -> Result<ExecuteReceipt, CommandError> {
        let payload = match input.into() {
            TaskInput::Text(text) => {
                let task = text.trim();
                if task.is_empty() {
                    return Err(CommandError::EmptyTask);
                }
                let mut body = Map::new();
                body.insert("task".into(), Value::String(task.to_string()));
                if let Some(model) = &self.model {
                    body.insert("model".into(), Value::String(model.clone()));
                }
                Value::Object(body)
            }
            TaskInput::Structured(value) if value.is_object() => value,
            TaskInput::Structured(other) => {
                return Err(CommandError::InvalidPayload(format!(
                    "expected an object, got {other}"
                )));
            }
        };

        let body = self.command(Resource::Execute, payload).await?;
        Ok(ExecuteReceipt::deserialize(&body).unwrap_or_default())
    }

    /// Switch the model used by the agent. Returns the server's message.
    pub async fn set_model(&self, name: &str) -> Result<String, CommandError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CommandError::EmptyModel);
        }
        let body = self.command(Resource::Model, json!({ "model": name })).await?;
        Ok(body
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| format!("Model updated to {name}"), str::to_string))
    }

    async fn command(&self, resource: Resource, payload: Value) -> Result<Value, CommandError> {
        let result = self
            .executor
            .execute(resource, Method::Post, Some(payload))
            .await;
        let now = self.clock.now();
        let mut state = self.state();
        match result {
            Ok(body) => {
                state.health.record_success(resource, now);
                Ok(body)
            }
            Err(err) => {
                state.health.record_failure(resource, now);
                Err(err.into())
            }
        }
    }

    /// `GET /health`, without health bookkeeping or retries.
    pub async fn check_backend(&self) -> Result<BackendHealth, NetworkError> {
        let options = RequestOptions {
            max_retries: 0,
            ..self.executor.defaults()
        };
        let body = self
            .executor
            .call("health", "/health", Method::Get, None, options)
            .await?;
        Ok(BackendHealth::deserialize(&body).unwrap_or_default())
    }

    pub fn is_in_fallback(&self, resource: Resource) -> bool {
        self.state().health.is_in_fallback(resource)
    }

    pub fn health_snapshot(&self) -> BTreeMap<Resource, ServiceHealthRecord> {
        self.state().health.snapshot()
    }

    pub fn clear_cache(&self) {
        self.state().cache.clear_all();
    }

    pub fn base_url(&self) -> &str {
        self.executor.base_url()
    }
}
