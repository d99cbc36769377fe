//! Aggregate root abstraction.
//!
//! An aggregate is a consistency boundary whose state derives entirely from
//! its ordered event history. Aggregates live in memory only: durable truth
//! is the event log, and each instance is owned exclusively by whichever
//! command-handling context currently holds it.

use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::record::EventRecord;

/// Trait for aggregate roots that reconstitute from event history.
///
/// Event application is tagged-variant dispatch: `apply` matches a closed
/// enum of payload variants exhaustively rather than relying on open-ended
/// subclassing.
pub trait AggregateRoot: Send + Sync + Sized {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Creates an aggregate at version 0 with zero state.
    fn new(id: Uuid) -> Self;

    /// Returns the type tag recorded on this aggregate's events.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (number of events applied).
    fn version(&self) -> i64;

    /// Apply an event to mutate internal state, advancing the version.
    /// Used both when raising new events and during reconstitution.
    fn apply(&mut self, event: &Self::Event);

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self);

    /// Rebuilds state by decoding and applying committed records in order.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Serialization`] if any record's payload cannot
    /// be decoded; state mutated so far is discarded by the caller.
    fn load_from_history(&mut self, records: &[EventRecord]) -> Result<(), DomainError> {
        for record in records {
            let event = Self::Event::from_record(record)?;
            self.apply(&event);
        }
        Ok(())
    }
}

/// Aggregates that can be cached as snapshots.
pub trait Snapshotting: AggregateRoot {
    /// Serializes the current internal state (not the event list).
    fn snapshot_state(&self) -> serde_json::Value;

    /// Restores an aggregate from a snapshot taken at `version`.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is invalid or carries a stale
    /// schema. The replay engine treats that as snapshot corruption and
    /// falls back to a full replay from version 0.
    fn restore(id: Uuid, version: i64, state: &serde_json::Value) -> Result<Self, DomainError>;
}
