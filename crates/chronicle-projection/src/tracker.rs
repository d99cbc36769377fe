//! Consistency tracking — per-event, per-projection delivery outcomes.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

/// Outcome of applying one event to one projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// The handler applied the event.
    Completed,
    /// The handler failed; the message is the handler's error.
    Failed(String),
}

/// A recorded failure, for operator queries.
#[derive(Debug, Clone)]
pub struct FailedProjection {
    /// The event that failed to project.
    pub event_id: Uuid,
    /// The projection that failed.
    pub projection_name: String,
    /// The handler's error message.
    pub error: String,
}

/// Tracks which projections have applied which events.
///
/// Keyed by `(event_id, projection_name)`; re-recording overwrites, so a
/// successful redelivery or rebuild clears an earlier failure. The store
/// is process-local: tracking restarts empty, which is sound because
/// redelivery converges idempotent handlers anyway.
#[derive(Debug, Default)]
pub struct ConsistencyTracker {
    outcomes: Mutex<HashMap<(Uuid, String), ProjectionOutcome>>,
}

impl ConsistencyTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful application, overwriting any earlier failure.
    pub fn record_success(&self, event_id: Uuid, projection_name: &str) {
        let mut outcomes = self.outcomes.lock().expect("Mutex poisoned");
        outcomes.insert(
            (event_id, projection_name.to_owned()),
            ProjectionOutcome::Completed,
        );
    }

    /// Records a failed application.
    pub fn record_failure(&self, event_id: Uuid, projection_name: &str, error: &str) {
        let mut outcomes = self.outcomes.lock().expect("Mutex poisoned");
        outcomes.insert(
            (event_id, projection_name.to_owned()),
            ProjectionOutcome::Failed(error.to_owned()),
        );
    }

    /// Whether every recorded projection of this event completed. False
    /// when any outcome is a failure or when nothing has been recorded
    /// yet.
    #[must_use]
    pub fn all_projections_complete(&self, event_id: Uuid) -> bool {
        let outcomes = self.outcomes.lock().expect("Mutex poisoned");
        let mut seen = false;
        for ((id, _), outcome) in outcomes.iter() {
            if *id == event_id {
                if *outcome != ProjectionOutcome::Completed {
                    return false;
                }
                seen = true;
            }
        }
        seen
    }

    /// All currently failed `(event, projection)` pairs.
    #[must_use]
    pub fn failed_projections(&self) -> Vec<FailedProjection> {
        let outcomes = self.outcomes.lock().expect("Mutex poisoned");
        outcomes
            .iter()
            .filter_map(|((event_id, name), outcome)| match outcome {
                ProjectionOutcome::Failed(error) => Some(FailedProjection {
                    event_id: *event_id,
                    projection_name: name.clone(),
                    error: error.clone(),
                }),
                ProjectionOutcome::Completed => None,
            })
            .collect()
    }
}
