//! Per-resource service health and circuit breaker.
//!
//! Each resource moves through `Healthy → Degraded(n) → Fallback` as requests
//! fail and snaps back to `Healthy` on the first success. The
//! [`transition_health`] function is the single entry point for all record
//! changes; [`ServiceHealthTracker`] only stores its results.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Resource;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Consecutive failures after which a resource enters fallback mode.
pub const DEFAULT_FALLBACK_THRESHOLD: u32 = 3;

/// Time in fallback before one recheck request is let through (milliseconds).
pub const DEFAULT_RECHECK_COOLDOWN_MS: i64 = 30_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Derived health state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Fallback,
}

/// Outcome of one request attempt against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failure,
}

/// Health record for one resource.
///
/// `healthy == false` implies `fail_count >= 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealthRecord {
    pub healthy: bool,
    pub last_check_at: DateTime<Utc>,
    pub fail_count: u32,
}

impl ServiceHealthRecord {
    #[must_use]
    pub fn healthy(now: DateTime<Utc>) -> Self {
        Self {
            healthy: true,
            last_check_at: now,
            fail_count: 0,
        }
    }

    #[must_use]
    pub fn state(&self, policy: &HealthPolicy) -> HealthState {
        if self.healthy {
            HealthState::Healthy
        } else if self.fail_count >= policy.fallback_threshold.max(1) {
            HealthState::Fallback
        } else {
            HealthState::Degraded
        }
    }
}

/// Thresholds for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive failures before the breaker trips.
    pub fallback_threshold: u32,
    /// Time in fallback before a recheck request is allowed.
    pub recheck_cooldown: TimeDelta,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            fallback_threshold: DEFAULT_FALLBACK_THRESHOLD,
            recheck_cooldown: TimeDelta::milliseconds(DEFAULT_RECHECK_COOLDOWN_MS),
        }
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Pure state machine: fold one request outcome into a health record.
///
/// When `previous` is `None` the resource is treated as healthy.
#[must_use]
pub fn transition_health(
    previous: Option<&ServiceHealthRecord>,
    outcome: RequestOutcome,
    now: DateTime<Utc>,
) -> ServiceHealthRecord {
    match outcome {
        RequestOutcome::Success => ServiceHealthRecord::healthy(now),
        RequestOutcome::Failure => {
            let prior = previous.map_or(0, |p| p.fail_count);
            ServiceHealthRecord {
                healthy: false,
                last_check_at: now,
                fail_count: prior.saturating_add(1),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Health records for every [`Resource`], one writer per session.
#[derive(Debug, Clone)]
pub struct ServiceHealthTracker {
    records: HashMap<Resource, ServiceHealthRecord>,
    policy: HealthPolicy,
}

impl ServiceHealthTracker {
    pub fn new(policy: HealthPolicy, now: DateTime<Utc>) -> Self {
        let records = Resource::ALL
            .iter()
            .map(|r| (*r, ServiceHealthRecord::healthy(now)))
            .collect();
        Self { records, policy }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn record_success(&mut self, resource: Resource, now: DateTime<Utc>) {
        self.apply(resource, RequestOutcome::Success, now);
    }

    pub fn record_failure(&mut self, resource: Resource, now: DateTime<Utc>) {
        self.apply(resource, RequestOutcome::Failure, now);
    }

    fn apply(&mut self, resource: Resource, outcome: RequestOutcome, now: DateTime<Utc>) {
        let next = transition_health(self.records.get(&resource), outcome, now);
        let before = self.state(resource);
        self.records.insert(resource, next);
        let after = self.state(resource);
        if before != after {
            tracing::info!(%resource, ?before, ?after, "service health changed");
        }
    }

    pub fn record(&self, resource: Resource) -> Option<&ServiceHealthRecord> {
        self.records.get(&resource)
    }

    pub fn state(&self, resource: Resource) -> HealthState {
        self.records
            .get(&resource)
            .map_or(HealthState::Healthy, |r| r.state(&self.policy))
    }

    /// Circuit-breaker predicate: `!healthy && fail_count >= threshold`.
    pub fn is_in_fallback(&self, resource: Resource) -> bool {
        self.state(resource) == HealthState::Fallback
    }

    /// Whether a resource in fallback has waited long enough for a recheck.
    ///
    /// Always `false` for resources that are not in fallback.
    pub fn recheck_due(&self, resource: Resource, now: DateTime<Utc>) -> bool {
        if !self.is_in_fallback(resource) {
            return false;
        }
        self.records
            .get(&resource)
            .is_some_and(|r| now.signed_duration_since(r.last_check_at) >= self.policy.recheck_cooldown)
    }

    /// Claim the recheck slot of a resource in fallback. At most one caller
    /// wins per cooldown window: a successful claim moves `last_check_at`
    /// to `now`, restarting the cooldown for everyone else.
    pub fn try_begin_recheck(&mut self, resource: Resource, now: DateTime<Utc>) -> bool {
        if !self.recheck_due(resource, now) {
            return false;
        }
        if let Some(record) = self.records.get_mut(&resource) {
            record.last_check_at = now;
        }
        true
    }

    /// Copy of every record, ordered by resource, for display.
    pub fn snapshot(&self) -> BTreeMap<Resource, ServiceHealthRecord> {
        self.records.iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
