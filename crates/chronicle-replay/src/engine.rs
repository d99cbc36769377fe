//! Replay engine — reconstructs aggregate state from snapshot + events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chronicle_core::aggregate::{AggregateRoot, Snapshotting};
use chronicle_core::error::DomainError;
use chronicle_core::record::EventRecord;
use chronicle_core::store::{EventStore, SnapshotStore};
use uuid::Uuid;

/// Rebuilds aggregates from the event log, bounded by the snapshot cache.
///
/// Replay is read-only and may run concurrently with appends; it reflects
/// the store as of query execution, no stronger isolation.
#[derive(Clone)]
pub struct ReplayEngine {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl ReplayEngine {
    /// Creates a replay engine over the given stores.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { events, snapshots }
    }

    /// Restores an aggregate from a snapshot payload, falling back to zero
    /// state when the payload is corrupt. Corruption is logged and the
    /// snapshot ignored; the caller replays the full history instead.
    fn restore_or_zero<A: Snapshotting>(
        aggregate_id: Uuid,
        version: i64,
        payload: &serde_json::Value,
    ) -> A {
        match A::restore(aggregate_id, version, payload) {
            Ok(aggregate) => aggregate,
            Err(err) => {
                tracing::warn!(
                    %aggregate_id,
                    snapshot_version = version,
                    error = %err,
                    "discarding corrupt snapshot, replaying full history"
                );
                A::new(aggregate_id)
            }
        }
    }

    /// Reconstructs the current state of an aggregate.
    ///
    /// Loads the latest snapshot (if any and restorable), then applies all
    /// events after the snapshot version in order. With no usable snapshot
    /// the full history is replayed from version 0. An aggregate with no
    /// committed events comes back at version 0 with zero state.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Serialization`] when an event payload cannot
    /// be decoded; the store itself is unaffected.
    pub async fn replay_aggregate<A: Snapshotting>(
        &self,
        aggregate_id: Uuid,
    ) -> Result<A, DomainError> {
        let mut aggregate = match self.snapshots.latest_snapshot(aggregate_id).await? {
            Some(snapshot) => {
                Self::restore_or_zero::<A>(aggregate_id, snapshot.version, &snapshot.payload)
            }
            None => A::new(aggregate_id),
        };

        let records = self
            .events
            .events_for_aggregate(aggregate_id, aggregate.version())
            .await?;
        aggregate.load_from_history(&records)?;
        Ok(aggregate)
    }

    /// Reconstructs an aggregate as of a point in time.
    ///
    /// Selects events with `occurred_at <= timestamp` (the boundary is
    /// inclusive), picks the newest snapshot at or below the highest
    /// selected version, and applies the remaining selected events.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Serialization`] when an event payload cannot
    /// be decoded.
    pub async fn replay_aggregate_as_of<A: Snapshotting>(
        &self,
        aggregate_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<A, DomainError> {
        let records = self.events.events_for_aggregate(aggregate_id, 0).await?;
        let selected: Vec<EventRecord> = records
            .into_iter()
            .filter(|r| r.occurred_at <= timestamp)
            .collect();

        let Some(max_version) = selected.last().map(|r| r.version) else {
            return Ok(A::new(aggregate_id));
        };

        let mut aggregate = match self
            .snapshots
            .latest_snapshot_at_or_below(aggregate_id, max_version)
            .await?
        {
            Some(snapshot) => {
                Self::restore_or_zero::<A>(aggregate_id, snapshot.version, &snapshot.payload)
            }
            None => A::new(aggregate_id),
        };

        let from = aggregate.version();
        let remaining: Vec<EventRecord> = selected
            .into_iter()
            .filter(|r| r.version > from)
            .collect();
        aggregate.load_from_history(&remaining)?;
        Ok(aggregate)
    }

    /// Walks the global log from a caller-held checkpoint, invoking the
    /// visitor for each event in global-sequence order. Processes at most
    /// `limit` events per call and returns the new checkpoint (the highest
    /// global sequence visited, or the input checkpoint when nothing was
    /// due). Safe to re-run over already-processed ranges: downstream
    /// projection handlers are idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first error the visitor produces; events before it have
    /// been visited, so the caller should checkpoint conservatively and
    /// re-run.
    pub async fn replay_all_events<F>(
        &self,
        from_global_sequence: i64,
        limit: usize,
        mut visitor: F,
    ) -> Result<i64, DomainError>
    where
        F: FnMut(&EventRecord) -> Result<(), DomainError> + Send,
    {
        let records = self.events.events_since(from_global_sequence, limit).await?;
        let mut checkpoint = from_global_sequence;
        for record in &records {
            visitor(record)?;
            checkpoint = record.global_sequence;
        }
        Ok(checkpoint)
    }
}
