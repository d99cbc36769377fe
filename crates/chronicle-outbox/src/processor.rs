//! The outbox processor — timer-driven publication of staged events.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::DomainError;
use chronicle_core::record::OutboxEntry;
use chronicle_core::store::OutboxStore;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::backoff::Backoff;
use crate::publisher::{EventPublisher, PublishError};

/// Tuning knobs for the outbox processor.
#[derive(Debug, Clone, Copy)]
pub struct OutboxProcessorConfig {
    /// How often the staging table is polled for due entries.
    pub poll_interval: StdDuration,
    /// Maximum entries fetched and published per poll.
    pub batch_size: usize,
    /// Publish attempts before an entry is flagged as exhausted.
    pub max_attempts: i32,
    /// Upper bound on a single publish attempt; elapsing counts as failure.
    pub publish_timeout: StdDuration,
    /// Retry schedule applied after a failed attempt.
    pub backoff: Backoff,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_secs(1),
            batch_size: 100,
            max_attempts: 10,
            publish_timeout: StdDuration::from_secs(5),
            backoff: Backoff::default(),
        }
    }
}

/// Polls the outbox and publishes due entries with at-least-once
/// semantics.
///
/// Single-instance only: there is no lease on outbox entries, so two
/// processors over the same store would publish duplicates beyond the
/// at-least-once contract. Run one processor per store.
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxProcessorConfig,
    clock: Arc<dyn Clock>,
}

impl OutboxProcessor {
    /// Creates a processor over the given store and publisher, using the
    /// system clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock, for deterministic retry schedules in tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the poll loop until the shutdown signal flips to `true` or its
    /// sender is dropped.
    ///
    /// The batch in flight when the signal arrives is drained before the
    /// loop exits; an entry whose publish never completed simply stays
    /// pending and is retried on the next start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "outbox processor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.drain_due_batch().await {
                        tracing::error!(error = %err, "outbox poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown, otherwise the
                    // closed channel is ready on every poll and the loop
                    // spins.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox processor stopped");
    }

    /// Fetches one batch of due entries and publishes each independently:
    /// one entry's failure never blocks the rest of the batch. Returns the
    /// number of entries published.
    ///
    /// # Errors
    ///
    /// Returns the store's error when fetching the batch or recording an
    /// outcome fails; publish failures are recorded, not returned.
    pub async fn drain_due_batch(&self) -> Result<usize, DomainError> {
        let due = self
            .store
            .due_entries(
                self.clock.now(),
                self.config.batch_size,
                self.config.max_attempts,
            )
            .await?;

        let mut published = 0;
        for entry in &due {
            match self.publish_one(entry).await {
                Ok(()) => {
                    self.store
                        .mark_processed(entry.event_id, self.clock.now())
                        .await?;
                    published += 1;
                }
                Err(err) => {
                    self.record_failed_attempt(entry, &err.to_string()).await?;
                }
            }
        }
        Ok(published)
    }

    async fn publish_one(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        match tokio::time::timeout(self.config.publish_timeout, self.publisher.publish(entry))
            .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(PublishError::new(format!(
                "publish timed out after {}ms",
                self.config.publish_timeout.as_millis()
            ))),
        }
    }

    async fn record_failed_attempt(
        &self,
        entry: &OutboxEntry,
        error: &str,
    ) -> Result<(), DomainError> {
        let attempts = entry.attempts + 1;
        if attempts >= self.config.max_attempts {
            tracing::error!(
                event_id = %entry.event_id,
                event_type = %entry.event_type,
                attempts,
                error,
                "outbox entry exhausted its retry budget, needs operator attention"
            );
            self.store.record_failure(entry.event_id, error, None).await
        } else {
            let next_retry_at = self.clock.now() + self.config.backoff.delay(attempts);
            tracing::warn!(
                event_id = %entry.event_id,
                event_type = %entry.event_type,
                attempts,
                next_retry_at = %next_retry_at,
                error,
                "publish failed, retry scheduled"
            );
            self.store
                .record_failure(entry.event_id, error, Some(next_retry_at))
                .await
        }
    }
}
