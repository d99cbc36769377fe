//! The contract between the outbox processor and downstream consumers.

use async_trait::async_trait;
use chronicle_core::record::OutboxEntry;
use thiserror::Error;

/// A failed publish attempt. The message is persisted on the outbox entry
/// as `last_error` for diagnostics.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PublishError(pub String);

impl PublishError {
    /// Creates a publish error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Publishes staged events to downstream consumers.
///
/// Implementations must be idempotent: the processor guarantees
/// at-least-once delivery, so an entry may be published again after a
/// crash between publish and `mark_processed`. The projection registry is
/// the in-process implementation; a broker producer would be another.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one staged event. An error (or a timeout imposed by the
    /// processor) counts as a failed attempt and schedules a retry.
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError>;
}
