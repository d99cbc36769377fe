//! Command abstractions.
//!
//! Command handlers are collaborators of this core: they load an aggregate,
//! mutate it, and save it. They also own the reload-and-retry loop when a
//! save loses the optimistic-concurrency race.

use std::future::Future;

use uuid::Uuid;

use crate::error::DomainError;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;
}

/// Runs `attempt` until it succeeds, fails with a non-conflict error, or
/// the retry budget is spent.
///
/// Each invocation of `attempt` must reload the aggregate so it observes
/// the version that won the race. Only
/// [`DomainError::ConcurrencyConflict`] is retried; every other error is
/// returned immediately, as is the final conflict once `max_attempts` is
/// reached.
///
/// # Errors
///
/// Returns whatever error the last invocation of `attempt` produced.
pub async fn append_with_retry<T, F, Fut>(
    max_attempts: u32,
    mut attempt: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut tries: u32 = 0;
    loop {
        match attempt().await {
            Err(DomainError::ConcurrencyConflict { .. }) if tries + 1 < max_attempts => {
                tries += 1;
            }
            other => return other,
        }
    }
}
