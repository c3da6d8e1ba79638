//! Time-boxed response cache, one entry per resource.
//!
//! Entries are overwritten wholesale. Writes go through a [`CacheTicket`]
//! taken when the request started so that a slow response can never replace
//! data from a request that began later and already committed.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::{Resource, ResourceData};

/// Normal time-to-live (milliseconds).
pub const DEFAULT_TTL_MS: i64 = 60_000;

/// Time-to-live used while a resource is in fallback (milliseconds).
pub const EXTENDED_TTL_MS: i64 = 300_000;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: ResourceData,
    pub stored_at: DateTime<Utc>,
    seq: u64,
}

/// Issued by [`ResponseCache::begin`]; orders commits for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket {
    pub resource: Resource,
    pub seq: u64,
}

/// Result of [`ResponseCache::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Stored,
    /// A request issued later already committed; this data was dropped.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: HashMap<Resource, CacheEntry>,
    next_seq: u64,
    ttl: TimeDelta,
    extended_ttl: TimeDelta,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(
            TimeDelta::milliseconds(DEFAULT_TTL_MS),
            TimeDelta::milliseconds(EXTENDED_TTL_MS),
        )
    }
}

impl ResponseCache {
    pub fn new(ttl: TimeDelta, extended_ttl: TimeDelta) -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
            ttl,
            extended_ttl,
        }
    }

    /// `false` if never populated, else `now - stored_at < ttl`.
    pub fn is_valid(&self, resource: Resource, use_extended_ttl: bool, now: DateTime<Utc>) -> bool {
        let ttl = if use_extended_ttl {
            self.extended_ttl
        } else {
            self.ttl
        };
        self.entries
            .get(&resource)
            .is_some_and(|e| now.signed_duration_since(e.stored_at) < ttl)
    }

    /// Cached data regardless of age.
    pub fn get(&self, resource: Resource) -> Option<&ResourceData> {
        self.entries.get(&resource).map(|e| &e.data)
    }

    pub fn entry(&self, resource: Resource) -> Option<&CacheEntry> {
        self.entries.get(&resource)
    }

    /// Unconditional overwrite; resets the timestamp to `now`.
    pub fn put(&mut self, resource: Resource, data: ResourceData, now: DateTime<Utc>) {
        let seq = self.issue();
        self.entries.insert(
            resource,
            CacheEntry {
                data,
                stored_at: now,
                seq,
            },
        );
    }

    /// Take a ticket before issuing a request for `resource`.
    pub fn begin(&mut self, resource: Resource) -> CacheTicket {
        CacheTicket {
            resource,
            seq: self.issue(),
        }
    }

    /// Store `data` unless a request with a newer ticket already committed.
    pub fn commit(&mut self, ticket: CacheTicket, data: ResourceData, now: DateTime<Utc>) -> CommitOutcome {
        if let Some(existing) = self.entries.get(&ticket.resource)
            && existing.seq > ticket.seq
        {
            return CommitOutcome::Superseded;
        }
        self.entries.insert(
            ticket.resource,
            CacheEntry {
                data,
                stored_at: now,
                seq: ticket.seq,
            },
        );
        CommitOutcome::Stored
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    fn issue(&mut self) -> u64 {
        self.next_seq = self.next_seq.saturating_add(1);
        self.next_seq
    }
}
