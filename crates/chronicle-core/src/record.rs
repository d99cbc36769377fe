//! Durable record types: committed events, snapshots, and outbox entries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{DomainEvent, EventMetadata};

/// An event as handed to the store for appending.
///
/// Version, global sequence, and `persisted_at` are deliberately absent:
/// those are assigned by the store at commit time so that per-aggregate
/// versions stay gapless and the global sequence stays store-owned.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Version of the payload schema.
    pub schema_version: i32,
    /// Serialized event payload, opaque to the core.
    pub payload: serde_json::Value,
    /// Free-form key-value metadata.
    pub metadata: HashMap<String, String>,
    /// The user on whose behalf the event was raised, if any.
    pub user_id: Option<Uuid>,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation (domain time, not commit time).
    pub occurred_at: DateTime<Utc>,
}

impl PendingEvent {
    /// Builds a pending event from a typed domain event.
    #[must_use]
    pub fn from_event<E: DomainEvent>(event: &E) -> Self {
        let meta = event.metadata();
        Self {
            event_id: meta.event_id,
            event_type: event.event_type().to_owned(),
            schema_version: event.schema_version(),
            payload: event.to_payload(),
            metadata: HashMap::new(),
            user_id: meta.user_id,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            occurred_at: meta.occurred_at,
        }
    }
}

/// A committed, immutable event record. Created only by the event store's
/// append; never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Type tag of the owning aggregate.
    pub aggregate_type: String,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// 1-based, gapless sequence within the aggregate stream.
    pub version: i64,
    /// Version of the payload schema.
    pub schema_version: i32,
    /// Serialized event payload, opaque to the core.
    pub payload: serde_json::Value,
    /// Free-form key-value metadata.
    pub metadata: HashMap<String, String>,
    /// The user on whose behalf the event was raised, if any.
    pub user_id: Option<Uuid>,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation (domain time).
    pub occurred_at: DateTime<Utc>,
    /// Timestamp assigned by the store at commit time.
    pub persisted_at: DateTime<Utc>,
    /// Strictly increasing sequence across the whole store, never reused.
    pub global_sequence: i64,
}

impl EventRecord {
    /// Rebuilds the [`EventMetadata`] envelope for this record, used by
    /// `DomainEvent::from_record` implementations.
    #[must_use]
    pub fn event_metadata(&self) -> EventMetadata {
        EventMetadata {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            schema_version: self.schema_version,
            aggregate_id: self.aggregate_id,
            sequence_number: self.version,
            user_id: self.user_id,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            occurred_at: self.occurred_at,
        }
    }
}

/// Cached aggregate state at a known version, used to bound replay cost.
///
/// A snapshot is never authoritative on its own; readers combine it with
/// the events committed after its tagged version.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    /// Aggregate this snapshot belongs to.
    pub aggregate_id: Uuid,
    /// Type tag of the owning aggregate.
    pub aggregate_type: String,
    /// The exact committed event version this state reflects.
    pub version: i64,
    /// Serialized aggregate state.
    pub payload: serde_json::Value,
    /// Timestamp the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

/// A durable staging row guaranteeing a committed event is eventually
/// published, even across crashes.
///
/// Created atomically with its source [`EventRecord`]; mutated only by the
/// outbox processor; never deleted (retained for audit/diagnostics).
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// The committed event this entry stages.
    pub event_id: Uuid,
    /// Aggregate the source event belongs to.
    pub aggregate_id: Uuid,
    /// Event type name, the dispatch key for publishing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Global sequence of the source event, used to order batches so that
    /// per-aggregate causal order is preserved.
    pub global_sequence: i64,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Timestamp of event creation (domain time).
    pub occurred_at: DateTime<Utc>,
    /// Timestamp the entry was staged.
    pub created_at: DateTime<Utc>,
    /// Set exactly once, when publishing succeeded. `None` iff pending.
    pub processed_at: Option<DateTime<Utc>>,
    /// Number of publish attempts made so far.
    pub attempts: i32,
    /// The most recent publish error, if any.
    pub last_error: Option<String>,
    /// Earliest time the next publish attempt may run.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Whether the entry has not yet been successfully published.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// Whether the entry has exhausted its retry budget and needs operator
    /// attention. Exhausted entries stay pending; they are never dropped.
    #[must_use]
    pub fn is_exhausted(&self, max_attempts: i32) -> bool {
        self.is_pending() && self.attempts >= max_attempts
    }
}
