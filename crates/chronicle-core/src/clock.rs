//! Clock abstraction for determinism.
//!
//! All timestamps in the core (event occurrence, outbox retry scheduling,
//! processed-at marks) flow through this trait so tests can inject a
//! deterministic implementation.

use chrono::{DateTime, Utc};

/// Abstraction over system time for deterministic behavior.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
