//! Chronicle Event Store — durable implementations of the core store traits.
//!
//! Two backends are provided:
//! - [`memory::InMemoryEventStore`] for tests and single-process development,
//! - [`postgres::PgEventStore`] for production, where an append commits the
//!   event rows and their outbox staging rows in one transaction.

pub mod memory;
pub mod postgres;
pub mod schema;
