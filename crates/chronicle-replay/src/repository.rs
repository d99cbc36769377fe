//! Aggregate repository — load/save orchestration for command handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chronicle_core::aggregate::{AggregateRoot, Snapshotting};
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::DomainError;
use chronicle_core::record::{PendingEvent, SnapshotRecord};
use chronicle_core::store::{EventStore, EveryN, SnapshotPolicy, SnapshotStore};
use uuid::Uuid;

use crate::engine::ReplayEngine;

/// Orchestrates aggregate loading (via the replay engine) and saving (via
/// the event store under an expected-version check, with policy-driven
/// snapshotting).
#[derive(Clone)]
pub struct Repository {
    engine: ReplayEngine,
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    policy: Arc<dyn SnapshotPolicy>,
    clock: Arc<dyn Clock>,
}

impl Repository {
    /// Creates a repository with the default snapshot policy (every 50
    /// committed events) and the system clock.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            engine: ReplayEngine::new(Arc::clone(&events), Arc::clone(&snapshots)),
            events,
            snapshots,
            policy: Arc::new(EveryN::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the snapshot policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn SnapshotPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the clock, for deterministic snapshot timestamps in tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Loads the current state of an aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::AggregateNotFound`] when the aggregate has no
    /// committed events, and [`DomainError::Serialization`] when replay
    /// cannot decode a stored payload.
    pub async fn load<A: Snapshotting>(&self, aggregate_id: Uuid) -> Result<A, DomainError> {
        let aggregate = self.engine.replay_aggregate::<A>(aggregate_id).await?;
        if aggregate.version() == 0 {
            return Err(DomainError::AggregateNotFound(aggregate_id));
        }
        Ok(aggregate)
    }

    /// Loads an aggregate as of a point in time (inclusive boundary).
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::AggregateNotFound`] when no event occurred at
    /// or before the timestamp.
    pub async fn load_as_of<A: Snapshotting>(
        &self,
        aggregate_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<A, DomainError> {
        let aggregate = self
            .engine
            .replay_aggregate_as_of::<A>(aggregate_id, timestamp)
            .await?;
        if aggregate.version() == 0 {
            return Err(DomainError::AggregateNotFound(aggregate_id));
        }
        Ok(aggregate)
    }

    /// Persists an aggregate's uncommitted events and returns the committed
    /// version.
    ///
    /// The expected version is the aggregate's version minus its
    /// uncommitted events — i.e. the version it was loaded at. On success
    /// the uncommitted list is cleared (raising already advanced the
    /// in-memory version) and, when the snapshot policy fires, a snapshot
    /// is saved. Snapshot persistence failures are logged and swallowed:
    /// the events are already durable and the cache can be rebuilt.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ConcurrencyConflict`] when another writer
    /// committed first; the caller should reload and retry.
    pub async fn save<A: Snapshotting>(&self, aggregate: &mut A) -> Result<i64, DomainError> {
        let uncommitted = aggregate.uncommitted_events();
        if uncommitted.is_empty() {
            return Ok(aggregate.version());
        }

        let pending: Vec<PendingEvent> =
            uncommitted.iter().map(PendingEvent::from_event).collect();
        #[allow(clippy::cast_possible_wrap)]
        let expected_version = aggregate.version() - pending.len() as i64;

        let committed = self
            .events
            .append_events(
                aggregate.aggregate_id(),
                A::aggregate_type(),
                expected_version,
                &pending,
            )
            .await?;
        aggregate.clear_uncommitted_events();

        if self.policy.should_snapshot(committed) {
            let snapshot = SnapshotRecord {
                aggregate_id: aggregate.aggregate_id(),
                aggregate_type: A::aggregate_type().to_owned(),
                version: committed,
                payload: aggregate.snapshot_state(),
                created_at: self.clock.now(),
            };
            if let Err(err) = self.snapshots.save_snapshot(snapshot).await {
                tracing::warn!(
                    aggregate_id = %aggregate.aggregate_id(),
                    version = committed,
                    error = %err,
                    "snapshot save failed, continuing without it"
                );
            }
        }

        Ok(committed)
    }
}
