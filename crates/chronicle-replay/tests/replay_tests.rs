//! Integration tests for the replay engine and repository, using the
//! in-memory store and the ledger fixture aggregate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use chronicle_core::aggregate::{AggregateRoot, Snapshotting};
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::record::{PendingEvent, SnapshotRecord};
use chronicle_core::store::{EventStore, EveryN, SnapshotStore};
use chronicle_event_store::memory::InMemoryEventStore;
use chronicle_replay::{ReplayEngine, Repository};
use chronicle_test_support::{FixedClock, LedgerAccount, SteppingClock};
use uuid::Uuid;

fn stores() -> (InMemoryEventStore, Arc<dyn EventStore>, Arc<dyn SnapshotStore>) {
    let store = InMemoryEventStore::new();
    let events: Arc<dyn EventStore> = Arc::new(store.clone());
    let snapshots: Arc<dyn SnapshotStore> = Arc::new(store.clone());
    (store, events, snapshots)
}

fn fixed_clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap())
}

// --- determinism ---

#[tokio::test]
async fn test_replay_yields_state_identical_to_incremental_application() {
    // Arrange
    let (_, events, snapshots) = stores();
    let repo = Repository::new(events, snapshots);
    let clock = fixed_clock();
    let account_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();

    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", correlation_id, &clock);
    account.deposit(500, correlation_id, &clock);
    account.withdraw(150, correlation_id, &clock).unwrap();

    // Act
    repo.save(&mut account).await.unwrap();
    let replayed: LedgerAccount = repo.load(account_id).await.unwrap();

    // Assert: replaying full history equals the incrementally applied state.
    assert_eq!(replayed.version(), account.version());
    assert_eq!(replayed.balance, account.balance);
    assert_eq!(replayed.owner, account.owner);
    assert!(replayed.uncommitted_events().is_empty());
}

// --- load/save lifecycle ---

#[tokio::test]
async fn test_load_unknown_aggregate_fails() {
    let (_, events, snapshots) = stores();
    let repo = Repository::new(events, snapshots);

    let result = repo.load::<LedgerAccount>(Uuid::new_v4()).await;

    assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
}

#[tokio::test]
async fn test_save_clears_uncommitted_and_returns_committed_version() {
    let (_, events, snapshots) = stores();
    let repo = Repository::new(events, snapshots);
    let clock = fixed_clock();

    let mut account = LedgerAccount::new(Uuid::new_v4());
    account.open("Avery", Uuid::new_v4(), &clock);
    account.deposit(100, Uuid::new_v4(), &clock);

    let committed = repo.save(&mut account).await.unwrap();

    assert_eq!(committed, 2);
    assert!(account.uncommitted_events().is_empty());
    assert_eq!(account.version(), 2);

    // Saving with nothing uncommitted is a no-op.
    let again = repo.save(&mut account).await.unwrap();
    assert_eq!(again, 2);
}

#[tokio::test]
async fn test_stale_writer_gets_concurrency_conflict() {
    let (_, events, snapshots) = stores();
    let repo = Repository::new(events, snapshots);
    let clock = fixed_clock();
    let account_id = Uuid::new_v4();

    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", Uuid::new_v4(), &clock);
    repo.save(&mut account).await.unwrap();

    // Two copies loaded at version 1; the first save wins.
    let mut first: LedgerAccount = repo.load(account_id).await.unwrap();
    let mut second: LedgerAccount = repo.load(account_id).await.unwrap();

    first.deposit(100, Uuid::new_v4(), &clock);
    repo.save(&mut first).await.unwrap();

    second.deposit(200, Uuid::new_v4(), &clock);
    let result = repo.save(&mut second).await;

    match result {
        Err(DomainError::ConcurrencyConflict {
            aggregate_id,
            expected,
            actual,
        }) => {
            assert_eq!(aggregate_id, account_id);
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
}

// --- snapshots ---

#[tokio::test]
async fn test_snapshot_policy_fires_on_save() {
    let (store, events, snapshots) = stores();
    let repo = Repository::new(events, snapshots).with_policy(Arc::new(EveryN(2)));
    let clock = fixed_clock();
    let account_id = Uuid::new_v4();

    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", Uuid::new_v4(), &clock);
    account.deposit(300, Uuid::new_v4(), &clock);
    repo.save(&mut account).await.unwrap();

    let snapshot = store.latest_snapshot(account_id).await.unwrap().unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.aggregate_type, "ledger_account");
}

#[tokio::test]
async fn test_replay_from_snapshot_equals_full_replay() {
    // The end-to-end scenario: two events, a failed stale append, a
    // snapshot at version 2, one further event, then both replay paths.
    let (store, events, snapshots) = stores();
    let repo = Repository::new(Arc::clone(&events), Arc::clone(&snapshots))
        .with_policy(Arc::new(EveryN(2)));
    let clock = fixed_clock();
    let account_id = Uuid::new_v4();

    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", Uuid::new_v4(), &clock);
    account.deposit(500, Uuid::new_v4(), &clock);
    let committed = repo.save(&mut account).await.unwrap();
    assert_eq!(committed, 2);

    // A stale concurrent writer still at version 0 must be rejected.
    let mut stale = LedgerAccount::new(account_id);
    stale.open("Mallory", Uuid::new_v4(), &clock);
    let conflict = repo.save(&mut stale).await;
    assert!(matches!(
        conflict,
        Err(DomainError::ConcurrencyConflict { expected: 0, actual: 2, .. })
    ));

    // Snapshot was taken at version 2 by the policy; append one more event.
    assert_eq!(
        store.latest_snapshot(account_id).await.unwrap().unwrap().version,
        2
    );
    let mut current: LedgerAccount = repo.load(account_id).await.unwrap();
    current.withdraw(100, Uuid::new_v4(), &clock).unwrap();
    assert_eq!(repo.save(&mut current).await.unwrap(), 3);

    // Snapshot + 1 trailing event must equal a full replay from scratch.
    let via_snapshot: LedgerAccount = repo.load(account_id).await.unwrap();

    let engine_without_snapshots = ReplayEngine::new(
        events,
        Arc::new(InMemoryEventStore::new()) as Arc<dyn SnapshotStore>,
    );
    let full: LedgerAccount = engine_without_snapshots
        .replay_aggregate(account_id)
        .await
        .unwrap();

    assert_eq!(via_snapshot.version(), 3);
    assert_eq!(full.version(), 3);
    assert_eq!(via_snapshot.balance, full.balance);
    assert_eq!(via_snapshot.owner, full.owner);
    assert_eq!(via_snapshot.balance, 400);
}

#[tokio::test]
async fn test_corrupt_snapshot_falls_back_to_full_history() {
    let (store, events, snapshots) = stores();
    let repo = Repository::new(events, snapshots);
    let clock = fixed_clock();
    let account_id = Uuid::new_v4();

    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", Uuid::new_v4(), &clock);
    account.deposit(250, Uuid::new_v4(), &clock);
    repo.save(&mut account).await.unwrap();

    // Poison the snapshot cache with an unreadable payload at version 2.
    store
        .save_snapshot(SnapshotRecord {
            aggregate_id: account_id,
            aggregate_type: "ledger_account".to_owned(),
            version: 2,
            payload: serde_json::json!("not an account state"),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let replayed: LedgerAccount = repo.load(account_id).await.unwrap();

    assert_eq!(replayed.version(), 2);
    assert_eq!(replayed.balance, 250);
    assert_eq!(replayed.owner.as_deref(), Some("Avery"));
}

#[tokio::test]
async fn test_malformed_event_payload_fails_replay_but_leaves_log_readable() {
    // Arrange: one good event, then a committed record whose payload the
    // ledger event cannot decode.
    let (_, events, snapshots) = stores();
    let repo = Repository::new(Arc::clone(&events), snapshots);
    let clock = fixed_clock();
    let account_id = Uuid::new_v4();

    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", Uuid::new_v4(), &clock);
    let mut pending: Vec<PendingEvent> = account
        .uncommitted_events()
        .iter()
        .map(PendingEvent::from_event)
        .collect();
    let correlation_id = Uuid::new_v4();
    pending.push(PendingEvent {
        event_id: Uuid::new_v4(),
        event_type: "ledger.funds_deposited".to_owned(),
        schema_version: 1,
        payload: serde_json::json!("not a ledger payload"),
        metadata: HashMap::new(),
        user_id: None,
        correlation_id,
        causation_id: correlation_id,
        occurred_at: clock.now(),
    });
    events
        .append_events(account_id, "ledger_account", 0, &pending)
        .await
        .unwrap();

    // Act
    let result = repo.load::<LedgerAccount>(account_id).await;

    // Assert: the replay call fails, the stored log is untouched.
    assert!(matches!(result, Err(DomainError::Serialization(_))));
    let records = events.events_for_aggregate(account_id, 0).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].payload, serde_json::json!("not a ledger payload"));
}

// --- as-of replay ---

#[tokio::test]
async fn test_load_as_of_boundary_is_inclusive() {
    let (_, events, snapshots) = stores();
    let repo = Repository::new(events, snapshots);
    let start = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
    let clock = SteppingClock::new(start);
    let account_id = Uuid::new_v4();

    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", Uuid::new_v4(), &clock);
    clock.advance(Duration::minutes(10));
    account.deposit(500, Uuid::new_v4(), &clock);
    clock.advance(Duration::minutes(10));
    account.withdraw(100, Uuid::new_v4(), &clock).unwrap();
    repo.save(&mut account).await.unwrap();

    // As of exactly the deposit's timestamp: the deposit is included, the
    // later withdrawal is not.
    let boundary = start + Duration::minutes(10);
    let as_of: LedgerAccount = repo.load_as_of(account_id, boundary).await.unwrap();
    assert_eq!(as_of.version(), 2);
    assert_eq!(as_of.balance, 500);

    // Just before the deposit only the open is visible.
    let earlier: LedgerAccount = repo
        .load_as_of(account_id, boundary - Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(earlier.version(), 1);
    assert_eq!(earlier.balance, 0);

    // Before any event the aggregate does not exist yet.
    let before = repo
        .load_as_of::<LedgerAccount>(account_id, start - Duration::seconds(1))
        .await;
    assert!(matches!(before, Err(DomainError::AggregateNotFound(_))));
}

#[tokio::test]
async fn test_as_of_replay_uses_snapshot_at_or_below_selected_version() {
    let (store, events, snapshots) = stores();
    let repo = Repository::new(events, snapshots);
    let start = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
    let clock = SteppingClock::new(start);
    let account_id = Uuid::new_v4();

    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", Uuid::new_v4(), &clock);
    clock.advance(Duration::minutes(1));
    account.deposit(100, Uuid::new_v4(), &clock);
    clock.advance(Duration::minutes(1));
    account.deposit(200, Uuid::new_v4(), &clock);
    repo.save(&mut account).await.unwrap();

    // Snapshots at versions 2 and 3; as-of version 2 must pick the first.
    for version in [2, 3] {
        let state: LedgerAccount = repo.load(account_id).await.unwrap();
        store
            .save_snapshot(SnapshotRecord {
                aggregate_id: account_id,
                aggregate_type: "ledger_account".to_owned(),
                version,
                payload: if version == 2 {
                    serde_json::json!({"owner": "Avery", "balance": 100})
                } else {
                    state.snapshot_state()
                },
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let as_of: LedgerAccount = repo
        .load_as_of(account_id, start + Duration::minutes(1))
        .await
        .unwrap();

    assert_eq!(as_of.version(), 2);
    assert_eq!(as_of.balance, 100);
}

// --- full-log replay ---

#[tokio::test]
async fn test_replay_all_events_is_batched_and_restartable() {
    let (_, events, snapshots) = stores();
    let engine = ReplayEngine::new(Arc::clone(&events), snapshots);
    let clock = fixed_clock();

    let repo_events = events;
    let account_id = Uuid::new_v4();
    let mut account = LedgerAccount::new(account_id);
    account.open("Avery", Uuid::new_v4(), &clock);
    for _ in 0..4 {
        account.deposit(10, Uuid::new_v4(), &clock);
    }
    let repo = Repository::new(
        repo_events,
        Arc::new(InMemoryEventStore::new()) as Arc<dyn SnapshotStore>,
    );
    repo.save(&mut account).await.unwrap();

    // First batch of three, then resume from the returned checkpoint.
    let mut seen: Vec<i64> = Vec::new();
    let checkpoint = engine
        .replay_all_events(0, 3, |record| {
            seen.push(record.global_sequence);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(checkpoint, seen[2]);

    let final_checkpoint = engine
        .replay_all_events(checkpoint, 10, |record| {
            seen.push(record.global_sequence);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);

    // Nothing further: the checkpoint is returned unchanged.
    let idle = engine
        .replay_all_events(final_checkpoint, 10, |_| Ok(()))
        .await
        .unwrap();
    assert_eq!(idle, final_checkpoint);
}
