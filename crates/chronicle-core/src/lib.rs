//! Chronicle Core — shared event-sourcing abstractions.
//!
//! This crate defines the fundamental traits and types that the event store,
//! replay engine, outbox, and projection crates depend on. It contains no
//! infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod record;
pub mod store;
