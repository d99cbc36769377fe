//! Shared test mocks and fixtures for the Chronicle persistence core.

mod clock;
mod fixtures;
mod tracing_init;

pub use clock::{FixedClock, SteppingClock};
pub use fixtures::{LedgerAccount, LedgerEvent, LedgerEventKind};
pub use tracing_init::init_test_tracing;
