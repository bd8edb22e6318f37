//! Token → (transaction, span) store.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use uuid::Uuid;

use crate::apm::{Span, Transaction};
use crate::observability::metrics;

/// Per-request key linking the access and response phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The live pair created at request start.
#[derive(Debug)]
pub struct ActiveTrace {
    pub transaction: Transaction,
    /// Present only when the transaction is sampled and the upstream resolved.
    pub span: Option<Span>,
}

/// Concurrent map of in-flight correlated requests.
#[derive(Debug, Default)]
pub struct ActiveTraceRegistry {
    entries: DashMap<CorrelationToken, ActiveTrace>,
}

impl ActiveTraceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the pair for `token`, returning any entry it displaced.
    pub fn put(
        &self,
        token: CorrelationToken,
        transaction: Transaction,
        span: Option<Span>,
    ) -> Option<ActiveTrace> {
        let displaced = self.entries.insert(token, ActiveTrace { transaction, span });
        if displaced.is_some() {
            tracing::warn!(token = %token, "Correlation token reused, replacing active trace");
        }
        metrics::record_registry_size(self.entries.len());
        displaced
    }

    /// Borrow the entry for `token`. Holds a shard read lock while alive.
    pub fn get(&self, token: &CorrelationToken) -> Option<Ref<'_, CorrelationToken, ActiveTrace>> {
        self.entries.get(token)
    }

    /// Take the entry for `token` out of the registry.
    pub fn remove(&self, token: &CorrelationToken) -> Option<ActiveTrace> {
        let removed = self.entries.remove(token).map(|(_, entry)| entry);
        metrics::record_registry_size(self.entries.len());
        removed
    }

    /// Drop every entry whose transaction started more than `ttl` before `now`.
    ///
    /// Evicted transactions and spans are discarded without being reported.
    pub fn evict_older_than(&self, ttl: Duration, now: SystemTime) -> usize {
        let mut evicted = 0;
        self.entries.retain(|token, entry| {
            let expired = now
                .duration_since(entry.transaction.start())
                .map(|age| age > ttl)
                .unwrap_or(false);
            if expired {
                tracing::warn!(
                    token = %token,
                    trace_id = %entry.transaction.trace_id(),
                    transaction = %entry.transaction.name(),
                    "Evicting transaction that never completed"
                );
                evicted += 1;
            }
            !expired
        });

        if evicted > 0 {
            metrics::record_registry_evictions(evicted);
        }
        metrics::record_registry_size(self.entries.len());
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
