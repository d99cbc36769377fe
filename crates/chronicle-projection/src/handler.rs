//! The projection handler contract.

use async_trait::async_trait;
use chronicle_core::record::EventRecord;
use thiserror::Error;

/// Errors raised while applying a committed event to a read model.
///
/// These never reach the command side: the registry records them in the
/// consistency tracker and the outbox retries the delivery.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An event payload could not be decoded.
    #[error("payload deserialization failed: {0}")]
    Serialization(String),

    /// The read model update itself failed.
    #[error("read model update failed: {0}")]
    ReadModel(String),

    /// Querying the event log during a rebuild failed.
    #[error("event store query failed: {0}")]
    Store(String),

    /// No handler with the requested name is registered.
    #[error("unknown projection: {0}")]
    UnknownProjection(String),
}

impl From<serde_json::Error> for ProjectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Applies committed events to one read model.
///
/// Implementations must be idempotent: delivery is at-least-once, so the
/// same event may arrive more than once. The conventional shape is an
/// upsert keyed by a natural identifier, guarded by the event's version so
/// a redelivered event converges to the same row.
#[async_trait]
pub trait ProjectionHandler: Send + Sync {
    /// Stable name of this projection, the key used by the consistency
    /// tracker and by targeted rebuilds.
    fn name(&self) -> &'static str;

    /// Applies one committed event to the read model.
    async fn project(&self, record: &EventRecord) -> Result<(), ProjectionError>;
}
