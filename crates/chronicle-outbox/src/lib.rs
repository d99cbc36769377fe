//! Chronicle Outbox — at-least-once publication of committed events.
//!
//! The event store stages one outbox entry per committed event in the same
//! durable unit as the event itself. [`processor::OutboxProcessor`] polls
//! the staging table on a fixed interval, hands each due entry to an
//! [`publisher::EventPublisher`], and records the outcome: success marks
//! the entry processed exactly once, failure schedules a retry with capped
//! exponential backoff. Entries that exhaust their retry budget stay
//! pending and flagged for operators; they are never dropped.

pub mod backoff;
pub mod processor;
pub mod publisher;

pub use backoff::Backoff;
pub use processor::{OutboxProcessor, OutboxProcessorConfig};
pub use publisher::{EventPublisher, PublishError};
