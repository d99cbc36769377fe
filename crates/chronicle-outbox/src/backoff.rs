//! Retry scheduling — capped exponential backoff for publish failures.

use std::time::Duration as StdDuration;

use chrono::Duration;

/// Capped exponential backoff: the delay doubles with each attempt and
/// never exceeds the cap.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
}

impl Backoff {
    /// Creates a backoff schedule with the given base delay and cap.
    #[must_use]
    pub fn new(base: StdDuration, cap: StdDuration) -> Self {
        Self {
            base_ms: u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
            cap_ms: u64::try_from(cap.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Delay before the next attempt, given how many attempts have been
    /// made so far (the first retry passes 1). Non-positive inputs are
    /// treated as a first attempt.
    #[must_use]
    pub fn delay(&self, attempts: i32) -> Duration {
        let exp = u32::try_from(attempts.saturating_sub(1)).unwrap_or(0).min(20);
        let ms = self.base_ms.saturating_mul(1_u64 << exp).min(self.cap_ms);
        Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }
}

impl Default for Backoff {
    /// One second base, five minute cap.
    fn default() -> Self {
        Self::new(StdDuration::from_secs(1), StdDuration::from_secs(300))
    }
}
