//! Chronicle Replay — aggregate reconstruction from snapshots and events.
//!
//! [`engine::ReplayEngine`] rebuilds aggregate state, either current or as
//! of a point in time, and walks the global log for projection rebuilds.
//! [`repository::Repository`] is the load/save orchestration command
//! handlers talk to.

pub mod engine;
pub mod repository;

pub use engine::ReplayEngine;
pub use repository::Repository;
