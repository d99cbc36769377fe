//! The projection registry — event-type to handler dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::record::{EventRecord, OutboxEntry};
use chronicle_core::store::EventStore;
use chronicle_outbox::{EventPublisher, PublishError};

use crate::handler::{ProjectionError, ProjectionHandler};
use crate::tracker::ConsistencyTracker;

/// Routes committed events to projection handlers.
///
/// The routing table is built once at startup with [`register`]; there is
/// no runtime discovery. Dispatch invokes every handler registered for
/// the event's type independently and records each outcome in the
/// consistency tracker, so one handler's failure never blocks another's
/// update.
///
/// [`register`]: ProjectionRegistry::register
pub struct ProjectionRegistry {
    events: Arc<dyn EventStore>,
    tracker: Arc<ConsistencyTracker>,
    handlers: HashMap<String, Vec<Arc<dyn ProjectionHandler>>>,
}

impl ProjectionRegistry {
    /// Creates an empty registry over the given event log and tracker.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, tracker: Arc<ConsistencyTracker>) -> Self {
        Self {
            events,
            tracker,
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler for an event type. A handler may be registered
    /// under several event types; each type may have several handlers.
    #[must_use]
    pub fn register(mut self, event_type: &str, handler: Arc<dyn ProjectionHandler>) -> Self {
        self.handlers
            .entry(event_type.to_owned())
            .or_default()
            .push(handler);
        self
    }

    /// The consistency tracker outcomes are recorded into.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ConsistencyTracker> {
        &self.tracker
    }

    /// Looks up a handler by projection name, with the event types it is
    /// registered under.
    pub(crate) fn handler_by_name(
        &self,
        projection_name: &str,
    ) -> Option<(Arc<dyn ProjectionHandler>, Vec<String>)> {
        let mut event_types = Vec::new();
        let mut found = None;
        for (event_type, handlers) in &self.handlers {
            if let Some(handler) = handlers.iter().find(|h| h.name() == projection_name) {
                event_types.push(event_type.clone());
                found = Some(Arc::clone(handler));
            }
        }
        found.map(|handler| (handler, event_types))
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Dispatches one committed event to every handler registered for its
    /// type. An event type with no handlers is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::ReadModel`] when at least one handler
    /// failed, so an outbox delivery is retried. Successful handlers are
    /// not rolled back; they are idempotent, so the retry converges.
    pub async fn dispatch(&self, record: &EventRecord) -> Result<(), ProjectionError> {
        let Some(handlers) = self.handlers.get(&record.event_type) else {
            tracing::debug!(event_type = %record.event_type, "no projection handlers registered");
            return Ok(());
        };

        let mut failed = 0_usize;
        for handler in handlers {
            match handler.project(record).await {
                Ok(()) => {
                    self.tracker.record_success(record.event_id, handler.name());
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!(
                        event_id = %record.event_id,
                        event_type = %record.event_type,
                        projection = handler.name(),
                        error = %err,
                        "projection handler failed"
                    );
                    self.tracker
                        .record_failure(record.event_id, handler.name(), &err.to_string());
                }
            }
        }

        if failed > 0 {
            return Err(ProjectionError::ReadModel(format!(
                "{failed} of {} handlers failed for event {}",
                handlers.len(),
                record.event_id
            )));
        }
        Ok(())
    }
}

/// The registry is the in-process outbox publisher: a staged entry is
/// resolved to its committed record and dispatched to the read models.
#[async_trait]
impl EventPublisher for ProjectionRegistry {
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        // The staged entry carries its source event's global sequence, so
        // the record is fetched directly instead of scanning the stream.
        let record = self
            .events
            .events_since(entry.global_sequence - 1, 1)
            .await
            .map_err(|err| PublishError::new(err.to_string()))?
            .into_iter()
            .find(|r| r.event_id == entry.event_id)
            .ok_or_else(|| {
                PublishError::new(format!("committed event not found: {}", entry.event_id))
            })?;

        self.dispatch(&record)
            .await
            .map_err(|err| PublishError::new(err.to_string()))
    }
}
