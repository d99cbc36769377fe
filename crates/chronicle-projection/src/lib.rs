//! Chronicle Projection — read models derived from the event log.
//!
//! Handlers implement [`handler::ProjectionHandler`] and update their read
//! model by upsert, keyed by a natural identifier, so redelivery from the
//! at-least-once outbox converges instead of double-applying. The
//! [`registry::ProjectionRegistry`] maps event types to handlers at
//! startup, dispatches each committed event to every registered handler
//! independently, and records outcomes in the
//! [`tracker::ConsistencyTracker`]. [`rebuild::rebuild_read_model`]
//! repairs a drifted read model by re-replaying one aggregate through one
//! named handler.

pub mod handler;
pub mod rebuild;
pub mod registry;
pub mod tracker;

pub use handler::{ProjectionError, ProjectionHandler};
pub use rebuild::rebuild_read_model;
pub use registry::ProjectionRegistry;
pub use tracker::{ConsistencyTracker, FailedProjection, ProjectionOutcome};
