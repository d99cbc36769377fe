//! In-memory store for tests and single-process development.
//!
//! One lock region guards the event log, the outbox staging rows, and the
//! snapshot cache, so an append commits events and their outbox entries as
//! a single durable unit — the same guarantee the PostgreSQL backend gets
//! from a transaction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::DomainError;
use chronicle_core::record::{EventRecord, OutboxEntry, PendingEvent, SnapshotRecord};
use chronicle_core::store::{EventStore, OutboxStore, SnapshotStore};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    // Committed events in global-sequence order.
    log: Vec<EventRecord>,
    // Current highest version per aggregate.
    versions: HashMap<Uuid, i64>,
    // Staging rows in creation (= global-sequence) order. Never removed.
    outbox: Vec<OutboxEntry>,
    // Snapshots per aggregate, sorted by version ascending.
    snapshots: HashMap<Uuid, Vec<SnapshotRecord>>,
    next_global_sequence: i64,
}

/// Thread-safe in-memory event, snapshot, and outbox store.
#[derive(Clone)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventStore {
    /// Creates an empty store using the system clock for commit timestamps.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store with an injected clock, for deterministic
    /// `persisted_at`/`created_at` values in tests.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                next_global_sequence: 1,
                ..Inner::default()
            })),
            clock,
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        expected_version: i64,
        events: &[PendingEvent],
    ) -> Result<i64, DomainError> {
        if expected_version < 0 {
            return Err(DomainError::Validation(
                "expected version must not be negative".into(),
            ));
        }

        let mut inner = self.inner.write().expect("RwLock poisoned");

        let current = inner.versions.get(&aggregate_id).copied().unwrap_or(0);
        if current != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        if events.is_empty() {
            return Ok(current);
        }

        let persisted_at = self.clock.now();
        let mut version = current;

        for event in events {
            version += 1;
            let global_sequence = inner.next_global_sequence;
            inner.next_global_sequence += 1;

            let record = EventRecord {
                event_id: event.event_id,
                aggregate_id,
                aggregate_type: aggregate_type.to_owned(),
                event_type: event.event_type.clone(),
                version,
                schema_version: event.schema_version,
                payload: event.payload.clone(),
                metadata: event.metadata.clone(),
                user_id: event.user_id,
                correlation_id: event.correlation_id,
                causation_id: event.causation_id,
                occurred_at: event.occurred_at,
                persisted_at,
                global_sequence,
            };

            inner.outbox.push(OutboxEntry {
                event_id: record.event_id,
                aggregate_id,
                event_type: record.event_type.clone(),
                payload: record.payload.clone(),
                global_sequence,
                correlation_id: record.correlation_id,
                occurred_at: record.occurred_at,
                created_at: persisted_at,
                processed_at: None,
                attempts: 0,
                last_error: None,
                next_retry_at: None,
            });
            inner.log.push(record);
        }

        inner.versions.insert(aggregate_id, version);

        tracing::debug!(
            %aggregate_id,
            aggregate_type,
            committed_version = version,
            batch = events.len(),
            "appended events"
        );

        Ok(version)
    }

    async fn events_for_aggregate(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .log
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version > from_version)
            .cloned()
            .collect())
    }

    async fn events_by_type(
        &self,
        event_type: &str,
        after_global_sequence: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .log
            .iter()
            .filter(|e| e.event_type == event_type && e.global_sequence > after_global_sequence)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn events_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .log
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn events_since(
        &self,
        global_sequence: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .log
            .iter()
            .filter(|e| e.global_sequence > global_sequence)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.versions.get(&aggregate_id).copied().unwrap_or(0))
    }
}

#[async_trait]
impl SnapshotStore for InMemoryEventStore {
    async fn save_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), DomainError> {
        let mut inner = self.inner.write().expect("RwLock poisoned");

        let current = inner
            .versions
            .get(&snapshot.aggregate_id)
            .copied()
            .unwrap_or(0);
        if snapshot.version < 1 || snapshot.version > current {
            return Err(DomainError::Validation(format!(
                "snapshot version {} does not reference a committed event (current version {current})",
                snapshot.version
            )));
        }

        let entries = inner.snapshots.entry(snapshot.aggregate_id).or_default();
        entries.retain(|s| s.version != snapshot.version);
        entries.push(snapshot);
        entries.sort_by_key(|s| s.version);
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<SnapshotRecord>, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .snapshots
            .get(&aggregate_id)
            .and_then(|s| s.last())
            .cloned())
    }

    async fn latest_snapshot_at_or_below(
        &self,
        aggregate_id: Uuid,
        max_version: i64,
    ) -> Result<Option<SnapshotRecord>, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .snapshots
            .get(&aggregate_id)
            .and_then(|s| s.iter().rev().find(|s| s.version <= max_version))
            .cloned())
    }

    async fn prune_snapshots(&self, aggregate_id: Uuid, keep: usize) -> Result<(), DomainError> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        if let Some(entries) = inner.snapshots.get_mut(&aggregate_id) {
            let keep = keep.max(1);
            if entries.len() > keep {
                let cutoff = entries.len() - keep;
                entries.drain(..cutoff);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryEventStore {
    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEntry>, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .outbox
            .iter()
            .filter(|e| {
                e.is_pending()
                    && e.attempts < max_attempts
                    && e.next_retry_at.is_none_or(|t| t <= now)
            })
            .take(batch_size)
            .cloned()
            .collect())
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        let entry = inner
            .outbox
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or_else(|| {
                DomainError::Infrastructure(format!("outbox entry not found: {event_id}"))
            })?;

        // processed_at is set exactly once; a late duplicate ack is a no-op.
        if entry.processed_at.is_none() {
            entry.processed_at = Some(processed_at);
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        event_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), DomainError> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        let entry = inner
            .outbox
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or_else(|| {
                DomainError::Infrastructure(format!("outbox entry not found: {event_id}"))
            })?;

        entry.attempts += 1;
        entry.last_error = Some(error.to_owned());
        entry.next_retry_at = next_retry_at;
        Ok(())
    }

    async fn exhausted_entries(&self, max_attempts: i32) -> Result<Vec<OutboxEntry>, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .outbox
            .iter()
            .filter(|e| e.is_exhausted(max_attempts))
            .cloned()
            .collect())
    }

    async fn pending_count(&self) -> Result<usize, DomainError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.outbox.iter().filter(|e| e.is_pending()).count())
    }
}
