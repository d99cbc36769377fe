//! Targeted read-model repair.

use uuid::Uuid;

use crate::handler::ProjectionError;
use crate::registry::ProjectionRegistry;

/// Re-replays one aggregate's events through one named projection handler,
/// re-recording outcomes in the consistency tracker. Used to repair a
/// drifted or corrupted read model without touching the others.
///
/// Only events of types the handler is registered under are replayed.
/// Returns the number of events successfully re-applied.
///
/// # Errors
///
/// Returns [`ProjectionError::UnknownProjection`] when no handler carries
/// the name, [`ProjectionError::Store`] when the event log cannot be
/// queried, and the handler's own error (after all events were attempted)
/// when any re-application failed.
pub async fn rebuild_read_model(
    registry: &ProjectionRegistry,
    aggregate_id: Uuid,
    projection_name: &str,
) -> Result<usize, ProjectionError> {
    let (handler, event_types) = registry
        .handler_by_name(projection_name)
        .ok_or_else(|| ProjectionError::UnknownProjection(projection_name.to_owned()))?;

    let records = registry
        .events()
        .events_for_aggregate(aggregate_id, 0)
        .await
        .map_err(|err| ProjectionError::Store(err.to_string()))?;

    let mut applied = 0_usize;
    let mut first_failure: Option<ProjectionError> = None;
    for record in records
        .iter()
        .filter(|r| event_types.contains(&r.event_type))
    {
        match handler.project(record).await {
            Ok(()) => {
                registry
                    .tracker()
                    .record_success(record.event_id, projection_name);
                applied += 1;
            }
            Err(err) => {
                tracing::warn!(
                    %aggregate_id,
                    event_id = %record.event_id,
                    projection = projection_name,
                    error = %err,
                    "rebuild failed to re-apply event"
                );
                registry
                    .tracker()
                    .record_failure(record.event_id, projection_name, &err.to_string());
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
    }

    match first_failure {
        Some(err) => Err(err),
        None => {
            tracing::info!(
                %aggregate_id,
                projection = projection_name,
                events = applied,
                "read model rebuilt"
            );
            Ok(applied)
        }
    }
}
