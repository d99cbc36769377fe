//! Domain event abstractions.
//!
//! A domain event is an envelope of [`EventMetadata`] plus a closed set of
//! payload variants owned by one aggregate type. The core never interprets
//! payloads beyond `(event_type, schema_version)`; decoding happens only in
//! [`DomainEvent::from_record`] implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::record::EventRecord;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Version of the payload schema, for collaborator-side upcasting.
    pub schema_version: i32,
    /// Aggregate/stream this event belongs to.
    pub aggregate_id: Uuid,
    /// Monotonically increasing version within the aggregate stream.
    pub sequence_number: i64,
    /// The user on whose behalf the event was raised, if any.
    pub user_id: Option<Uuid>,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Trait that all domain events implement.
///
/// Events are value objects owned by the aggregate's uncommitted list; they
/// carry no back-pointer to the aggregate. Causal linkage travels purely
/// through `(aggregate_id, correlation_id, causation_id)`.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type name (used for serialization routing).
    fn event_type(&self) -> &'static str;

    /// Returns the payload schema version.
    fn schema_version(&self) -> i32 {
        1
    }

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// Decodes a committed record back into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Serialization`] when the stored payload cannot
    /// be interpreted. The error is fatal to the replay call that hit it and
    /// never affects stored data.
    fn from_record(record: &EventRecord) -> Result<Self, DomainError>
    where
        Self: Sized;
}
