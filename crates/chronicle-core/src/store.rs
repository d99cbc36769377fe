//! Store traits: event log, snapshot cache, and outbox staging.
//!
//! Implementations live in `chronicle-event-store`. The append path is the
//! only operation requiring atomicity across multiple rows: committed
//! events and their outbox staging rows form one durable unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::record::{EventRecord, OutboxEntry, PendingEvent, SnapshotRecord};

/// Authoritative append-only log of committed events; sole source of truth.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events under an expected-version check.
    ///
    /// On success the events receive consecutive versions
    /// `expected_version + 1 ..= expected_version + n` and monotonically
    /// increasing global sequence numbers, and one outbox entry per event is
    /// staged in the same durable unit. Returns the committed version.
    ///
    /// The store never blocks or locks across calls; conflicts are detected
    /// by compare-and-set on `(aggregate_id, expected_version)`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ConcurrencyConflict`] when `expected_version`
    /// does not equal the current highest version for the aggregate (0 for a
    /// new aggregate). The batch is fully rejected: no partial writes.
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        expected_version: i64,
        events: &[PendingEvent],
    ) -> Result<i64, DomainError>;

    /// Loads events for one aggregate with `version > from_version`,
    /// ordered by version. Pass `from_version = 0` for the full stream.
    async fn events_for_aggregate(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Loads events of one type with `global_sequence > after_global_sequence`,
    /// in global order, at most `limit`. Used to rebuild or backfill a single
    /// projection kind.
    async fn events_by_type(
        &self,
        event_type: &str,
        after_global_sequence: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Loads all events sharing a correlation ID, in global order, for
    /// causal tracing across aggregates.
    async fn events_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Loads events with `global_sequence > global_sequence`, in global
    /// order, at most `limit`. Used by catch-up subscribers independent of
    /// the outbox.
    async fn events_since(
        &self,
        global_sequence: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Returns the highest committed version for an aggregate, 0 if none.
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError>;
}

/// Cache of aggregate state at known versions, bounding replay cost.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persists a snapshot. The tagged version must reference a committed
    /// event version for the aggregate.
    async fn save_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), DomainError>;

    /// Returns the snapshot with the highest version for the aggregate.
    async fn latest_snapshot(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<SnapshotRecord>, DomainError>;

    /// Returns the newest snapshot whose version is `<= max_version`, used
    /// by point-in-time replay.
    async fn latest_snapshot_at_or_below(
        &self,
        aggregate_id: Uuid,
        max_version: i64,
    ) -> Result<Option<SnapshotRecord>, DomainError>;

    /// Deletes superseded snapshots, keeping the newest `keep` per
    /// aggregate.
    async fn prune_snapshots(&self, aggregate_id: Uuid, keep: usize) -> Result<(), DomainError>;
}

/// Decides when an aggregate's state is worth snapshotting, pluggable per
/// aggregate type.
pub trait SnapshotPolicy: Send + Sync {
    /// Whether a snapshot should be taken at the given committed version.
    fn should_snapshot(&self, version: i64) -> bool;
}

/// Snapshot every `n` committed events.
#[derive(Debug, Clone, Copy)]
pub struct EveryN(pub i64);

impl Default for EveryN {
    fn default() -> Self {
        Self(50)
    }
}

impl SnapshotPolicy for EveryN {
    fn should_snapshot(&self, version: i64) -> bool {
        self.0 > 0 && version % self.0 == 0
    }
}

/// Never snapshot. Useful for short-lived aggregates and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSnapshot;

impl SnapshotPolicy for NeverSnapshot {
    fn should_snapshot(&self, _version: i64) -> bool {
        false
    }
}

/// Durable staging of committed events awaiting publication.
///
/// Entries are created by [`EventStore::append_events`] in the same durable
/// unit as their source events and mutated only by the outbox processor.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns pending entries that are due at `now` — not yet processed,
    /// retry budget not exhausted, and `next_retry_at` unset or elapsed —
    /// ordered by global sequence, at most `batch_size`.
    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEntry>, DomainError>;

    /// Marks an entry as successfully published. Set exactly once.
    async fn mark_processed(
        &self,
        event_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Records a failed publish attempt: increments `attempts`, stores the
    /// error, and schedules the next retry (`None` when the budget is
    /// exhausted — the entry stays pending and flagged).
    async fn record_failure(
        &self,
        event_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), DomainError>;

    /// Returns pending entries whose retry budget is exhausted. These need
    /// operator attention; they are never silently dropped.
    async fn exhausted_entries(&self, max_attempts: i32) -> Result<Vec<OutboxEntry>, DomainError>;

    /// Number of entries not yet processed, for monitoring.
    async fn pending_count(&self) -> Result<usize, DomainError>;
}
