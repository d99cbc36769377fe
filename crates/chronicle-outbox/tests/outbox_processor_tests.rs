//! Integration tests for the outbox processor against the in-memory store.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::clock::Clock;
use chronicle_core::record::{OutboxEntry, PendingEvent};
use chronicle_core::store::{EventStore, OutboxStore};
use chronicle_event_store::memory::InMemoryEventStore;
use chronicle_outbox::{Backoff, EventPublisher, OutboxProcessor, OutboxProcessorConfig, PublishError};
use chronicle_test_support::{FixedClock, LedgerAccount, SteppingClock};
use uuid::Uuid;

/// Records published event IDs in order; fails entries whose event type is
/// in the deny list.
struct RecordingPublisher {
    published: Mutex<Vec<Uuid>>,
    failing_event_types: Vec<&'static str>,
}

impl RecordingPublisher {
    fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failing_event_types: Vec::new(),
        }
    }

    fn failing(event_types: Vec<&'static str>) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failing_event_types: event_types,
        }
    }

    fn published(&self) -> Vec<Uuid> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        if self.failing_event_types.contains(&entry.event_type.as_str()) {
            return Err(PublishError::new("downstream unavailable"));
        }
        self.published.lock().unwrap().push(entry.event_id);
        Ok(())
    }
}

/// Never completes within any sane publish timeout.
struct StalledPublisher;

#[async_trait]
impl EventPublisher for StalledPublisher {
    async fn publish(&self, _entry: &OutboxEntry) -> Result<(), PublishError> {
        tokio::time::sleep(StdDuration::from_millis(500)).await;
        Ok(())
    }
}

fn fixed_clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap())
}

/// Appends one `AccountOpened` plus `deposits` deposit events for a fresh
/// aggregate and returns the staged event IDs in commit order.
async fn stage_ledger_events(store: &InMemoryEventStore, deposits: usize) -> Vec<Uuid> {
    let clock = fixed_clock();
    let mut account = LedgerAccount::new(Uuid::new_v4());
    account.open("Avery", Uuid::new_v4(), &clock);
    for _ in 0..deposits {
        account.deposit(25, Uuid::new_v4(), &clock);
    }

    let pending: Vec<PendingEvent> = account
        .uncommitted_events()
        .iter()
        .map(PendingEvent::from_event)
        .collect();
    store
        .append_events(account.id, "ledger_account", 0, &pending)
        .await
        .unwrap();
    pending.iter().map(|p| p.event_id).collect()
}

/// Fetches pending entries regardless of retry schedule, for inspecting
/// attempts and errors.
async fn pending_entries(store: &InMemoryEventStore) -> Vec<OutboxEntry> {
    let far_future = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    store.due_entries(far_future, 1000, i32::MAX).await.unwrap()
}

#[tokio::test]
async fn test_due_entries_published_in_order_and_marked_processed_once() {
    // Arrange
    let store = InMemoryEventStore::new();
    let staged = stage_ledger_events(&store, 2).await;
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = OutboxProcessor::new(
        Arc::new(store.clone()),
        Arc::clone(&publisher) as Arc<dyn EventPublisher>,
        OutboxProcessorConfig::default(),
    );

    // Act
    let published = processor.drain_due_batch().await.unwrap();

    // Assert: all three entries published in global-sequence order.
    assert_eq!(published, 3);
    assert_eq!(publisher.published(), staged);
    assert_eq!(store.pending_count().await.unwrap(), 0);

    // A second drain finds nothing due and republishes nothing.
    let again = processor.drain_due_batch().await.unwrap();
    assert_eq!(again, 0);
    assert_eq!(publisher.published().len(), 3);
}

#[tokio::test]
async fn test_failures_schedule_retries_until_exhaustion() {
    // Arrange
    let store = InMemoryEventStore::new();
    stage_ledger_events(&store, 0).await;
    let clock = Arc::new(SteppingClock::new(
        Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap(),
    ));
    let config = OutboxProcessorConfig {
        max_attempts: 3,
        backoff: Backoff::new(StdDuration::from_secs(1), StdDuration::from_secs(60)),
        ..OutboxProcessorConfig::default()
    };
    let processor = OutboxProcessor::new(
        Arc::new(store.clone()),
        Arc::new(RecordingPublisher::failing(vec!["ledger.account_opened"])),
        config,
    )
    .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);

    // Act: first attempt fails and schedules a retry one second out.
    assert_eq!(processor.drain_due_batch().await.unwrap(), 0);
    let entry = pending_entries(&store).await.remove(0);
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.last_error.as_deref(), Some("downstream unavailable"));
    let first_retry_at = entry.next_retry_at.unwrap();
    assert_eq!(first_retry_at, clock.now() + Duration::seconds(1));

    // Not due yet: draining before the schedule touches nothing.
    assert_eq!(processor.drain_due_batch().await.unwrap(), 0);
    assert_eq!(pending_entries(&store).await[0].attempts, 1);

    // Second failure backs off further; the schedule strictly increases.
    clock.advance(Duration::seconds(1));
    assert_eq!(processor.drain_due_batch().await.unwrap(), 0);
    let entry = pending_entries(&store).await.remove(0);
    assert_eq!(entry.attempts, 2);
    let second_retry_at = entry.next_retry_at.unwrap();
    assert!(second_retry_at > first_retry_at);
    assert_eq!(second_retry_at, clock.now() + Duration::seconds(2));

    // Third failure exhausts the budget: no further schedule, entry stays
    // pending and flagged, and is excluded from subsequent batches.
    clock.advance(Duration::seconds(2));
    assert_eq!(processor.drain_due_batch().await.unwrap(), 0);
    let entry = pending_entries(&store).await.remove(0);
    assert_eq!(entry.attempts, 3);
    assert!(entry.next_retry_at.is_none());
    assert!(entry.is_exhausted(3));

    clock.advance(Duration::hours(1));
    assert!(store.due_entries(clock.now(), 100, 3).await.unwrap().is_empty());
    let exhausted = store.exhausted_entries(3).await.unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(store.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_publish_timeout_counts_as_failed_attempt() {
    // Arrange
    let store = InMemoryEventStore::new();
    stage_ledger_events(&store, 0).await;
    let config = OutboxProcessorConfig {
        publish_timeout: StdDuration::from_millis(10),
        ..OutboxProcessorConfig::default()
    };
    let processor = OutboxProcessor::new(
        Arc::new(store.clone()),
        Arc::new(StalledPublisher),
        config,
    );

    // Act
    let published = processor.drain_due_batch().await.unwrap();

    // Assert
    assert_eq!(published, 0);
    let entry = pending_entries(&store).await.remove(0);
    assert_eq!(entry.attempts, 1);
    assert!(entry.last_error.unwrap().contains("timed out"));
    assert!(entry.next_retry_at.is_some());
}

#[tokio::test]
async fn test_one_failing_entry_does_not_block_the_batch() {
    // Arrange: open + deposit + withdraw; only the withdrawal fails.
    let store = InMemoryEventStore::new();
    let clock = fixed_clock();
    let mut account = LedgerAccount::new(Uuid::new_v4());
    account.open("Avery", Uuid::new_v4(), &clock);
    account.deposit(100, Uuid::new_v4(), &clock);
    account.withdraw(40, Uuid::new_v4(), &clock).unwrap();
    let pending: Vec<PendingEvent> = account
        .uncommitted_events()
        .iter()
        .map(PendingEvent::from_event)
        .collect();
    store
        .append_events(account.id, "ledger_account", 0, &pending)
        .await
        .unwrap();

    let publisher = Arc::new(RecordingPublisher::failing(vec!["ledger.funds_withdrawn"]));
    let processor = OutboxProcessor::new(
        Arc::new(store.clone()),
        Arc::clone(&publisher) as Arc<dyn EventPublisher>,
        OutboxProcessorConfig::default(),
    );

    // Act
    let published = processor.drain_due_batch().await.unwrap();

    // Assert: two processed, the failing one pending with one attempt.
    assert_eq!(published, 2);
    assert_eq!(publisher.published().len(), 2);
    assert_eq!(store.pending_count().await.unwrap(), 1);
    let remaining = pending_entries(&store).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].event_type, "ledger.funds_withdrawn");
    assert_eq!(remaining[0].attempts, 1);
}

#[tokio::test]
async fn test_run_loop_publishes_and_stops_on_shutdown() {
    // Arrange
    chronicle_test_support::init_test_tracing();
    let store = InMemoryEventStore::new();
    let staged = stage_ledger_events(&store, 1).await;
    let publisher = Arc::new(RecordingPublisher::new());
    let config = OutboxProcessorConfig {
        poll_interval: StdDuration::from_millis(10),
        ..OutboxProcessorConfig::default()
    };
    let processor = Arc::new(OutboxProcessor::new(
        Arc::new(store.clone()),
        Arc::clone(&publisher) as Arc<dyn EventPublisher>,
        config,
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Act
    let worker = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move { processor.run(shutdown_rx).await })
    };
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();

    // Assert: the loop exits promptly and everything staged was published.
    tokio::time::timeout(StdDuration::from_secs(1), worker)
        .await
        .expect("processor did not stop after shutdown signal")
        .unwrap();
    assert_eq!(publisher.published(), staged);
    assert_eq!(store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_run_loop_stops_when_shutdown_sender_is_dropped() {
    // Arrange: a poll interval far longer than the test, so the loop can
    // only exit through the shutdown branch.
    let store = InMemoryEventStore::new();
    let config = OutboxProcessorConfig {
        poll_interval: StdDuration::from_secs(3600),
        ..OutboxProcessorConfig::default()
    };
    let processor = Arc::new(OutboxProcessor::new(
        Arc::new(store),
        Arc::new(RecordingPublisher::new()),
        config,
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Act: drop the sender without ever signalling `true`.
    let worker = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move { processor.run(shutdown_rx).await })
    };
    drop(shutdown_tx);

    // Assert: the closed channel counts as shutdown.
    tokio::time::timeout(StdDuration::from_secs(1), worker)
        .await
        .expect("processor did not stop after the shutdown sender was dropped")
        .unwrap();
}
