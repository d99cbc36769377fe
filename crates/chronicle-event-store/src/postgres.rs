//! `PostgreSQL` implementation of the event, snapshot, and outbox stores.
//!
//! `append_events` inserts the event rows and their outbox staging rows in
//! one transaction, so a crash can never leave a committed event without its
//! staging row. Version conflicts are detected twice: an explicit
//! compare-and-set against the current `MAX(version)`, and the
//! `UNIQUE (aggregate_id, version)` index as the backstop for writers that
//! raced past the first check.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::error::DomainError;
use chronicle_core::record::{EventRecord, OutboxEntry, PendingEvent, SnapshotRecord};
use chronicle_core::store::{EventStore, OutboxStore, SnapshotStore};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn max_version(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS version
             FROM chronicle_events
             WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await?;
        row.try_get("version")
    }

    async fn insert_event(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
        aggregate_type: &str,
        version: i64,
        event: &PendingEvent,
    ) -> Result<(), sqlx::Error> {
        let metadata = serde_json::to_value(&event.metadata)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let row = sqlx::query(
            "INSERT INTO chronicle_events
                (event_id, aggregate_id, aggregate_type, event_type, version,
                 schema_version, payload, metadata, user_id, correlation_id,
                 causation_id, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING global_sequence",
        )
        .bind(event.event_id)
        .bind(aggregate_id)
        .bind(aggregate_type)
        .bind(&event.event_type)
        .bind(version)
        .bind(event.schema_version)
        .bind(&event.payload)
        .bind(metadata)
        .bind(event.user_id)
        .bind(event.correlation_id)
        .bind(event.causation_id)
        .bind(event.occurred_at)
        .fetch_one(&mut **tx)
        .await?;

        let global_sequence: i64 = row.try_get("global_sequence")?;

        sqlx::query(
            "INSERT INTO chronicle_outbox
                (event_id, aggregate_id, event_type, payload, global_sequence,
                 correlation_id, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.event_id)
        .bind(aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(global_sequence)
        .bind(event.correlation_id)
        .bind(event.occurred_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

fn infra(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn event_from_row(row: &PgRow) -> Result<EventRecord, DomainError> {
    let metadata: serde_json::Value = row.try_get("metadata").map_err(infra)?;
    let metadata: HashMap<String, String> = serde_json::from_value(metadata)?;

    Ok(EventRecord {
        event_id: row.try_get("event_id").map_err(infra)?,
        aggregate_id: row.try_get("aggregate_id").map_err(infra)?,
        aggregate_type: row.try_get("aggregate_type").map_err(infra)?,
        event_type: row.try_get("event_type").map_err(infra)?,
        version: row.try_get("version").map_err(infra)?,
        schema_version: row.try_get("schema_version").map_err(infra)?,
        payload: row.try_get("payload").map_err(infra)?,
        metadata,
        user_id: row.try_get("user_id").map_err(infra)?,
        correlation_id: row.try_get("correlation_id").map_err(infra)?,
        causation_id: row.try_get("causation_id").map_err(infra)?,
        occurred_at: row.try_get("occurred_at").map_err(infra)?,
        persisted_at: row.try_get("persisted_at").map_err(infra)?,
        global_sequence: row.try_get("global_sequence").map_err(infra)?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<SnapshotRecord, DomainError> {
    Ok(SnapshotRecord {
        aggregate_id: row.try_get("aggregate_id").map_err(infra)?,
        aggregate_type: row.try_get("aggregate_type").map_err(infra)?,
        version: row.try_get("version").map_err(infra)?,
        payload: row.try_get("payload").map_err(infra)?,
        created_at: row.try_get("created_at").map_err(infra)?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEntry, DomainError> {
    Ok(OutboxEntry {
        event_id: row.try_get("event_id").map_err(infra)?,
        aggregate_id: row.try_get("aggregate_id").map_err(infra)?,
        event_type: row.try_get("event_type").map_err(infra)?,
        payload: row.try_get("payload").map_err(infra)?,
        global_sequence: row.try_get("global_sequence").map_err(infra)?,
        correlation_id: row.try_get("correlation_id").map_err(infra)?,
        occurred_at: row.try_get("occurred_at").map_err(infra)?,
        created_at: row.try_get("created_at").map_err(infra)?,
        processed_at: row.try_get("processed_at").map_err(infra)?,
        attempts: row.try_get("attempts").map_err(infra)?,
        last_error: row.try_get("last_error").map_err(infra)?,
        next_retry_at: row.try_get("next_retry_at").map_err(infra)?,
    })
}

fn limit_to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        expected_version: i64,
        events: &[PendingEvent],
    ) -> Result<i64, DomainError> {
        if expected_version < 0 {
            return Err(DomainError::Validation(
                "expected version must not be negative".into(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(infra)?;

        let current = Self::max_version(&mut tx, aggregate_id)
            .await
            .map_err(infra)?;
        if current != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        if events.is_empty() {
            return Ok(current);
        }

        let mut failed: Option<sqlx::Error> = None;
        for (offset, event) in events.iter().enumerate() {
            #[allow(clippy::cast_possible_wrap)]
            let version = expected_version + 1 + offset as i64;
            if let Err(e) =
                Self::insert_event(&mut tx, aggregate_id, aggregate_type, version, event).await
            {
                failed = Some(e);
                break;
            }
        }

        if let Some(err) = failed {
            tx.rollback().await.map_err(infra)?;
            if is_unique_violation(&err) {
                // A concurrent writer won the race between our version check
                // and the insert; report the version it committed.
                let actual = self.current_version(aggregate_id).await?;
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_id,
                    expected: expected_version,
                    actual,
                });
            }
            return Err(infra(err));
        }

        tx.commit().await.map_err(infra)?;

        #[allow(clippy::cast_possible_wrap)]
        let committed = expected_version + events.len() as i64;
        tracing::debug!(
            %aggregate_id,
            aggregate_type,
            committed_version = committed,
            batch = events.len(),
            "appended events"
        );
        Ok(committed)
    }

    async fn events_for_aggregate(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let rows = sqlx::query(
            "SELECT * FROM chronicle_events
             WHERE aggregate_id = $1 AND version > $2
             ORDER BY version",
        )
        .bind(aggregate_id)
        .bind(from_version)
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn events_by_type(
        &self,
        event_type: &str,
        after_global_sequence: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let rows = sqlx::query(
            "SELECT * FROM chronicle_events
             WHERE event_type = $1 AND global_sequence > $2
             ORDER BY global_sequence
             LIMIT $3",
        )
        .bind(event_type)
        .bind(after_global_sequence)
        .bind(limit_to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn events_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let rows = sqlx::query(
            "SELECT * FROM chronicle_events
             WHERE correlation_id = $1
             ORDER BY global_sequence",
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn events_since(
        &self,
        global_sequence: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let rows = sqlx::query(
            "SELECT * FROM chronicle_events
             WHERE global_sequence > $1
             ORDER BY global_sequence
             LIMIT $2",
        )
        .bind(global_sequence)
        .bind(limit_to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS version
             FROM chronicle_events
             WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await
        .map_err(infra)?;

        row.try_get("version").map_err(infra)
    }
}

#[async_trait]
impl SnapshotStore for PgEventStore {
    async fn save_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), DomainError> {
        let current = self.current_version(snapshot.aggregate_id).await?;
        if snapshot.version < 1 || snapshot.version > current {
            return Err(DomainError::Validation(format!(
                "snapshot version {} does not reference a committed event (current version {current})",
                snapshot.version
            )));
        }

        sqlx::query(
            "INSERT INTO chronicle_snapshots
                (aggregate_id, aggregate_type, version, payload, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (aggregate_id, version)
             DO UPDATE SET payload = EXCLUDED.payload, created_at = EXCLUDED.created_at",
        )
        .bind(snapshot.aggregate_id)
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version)
        .bind(&snapshot.payload)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        Ok(())
    }

    async fn latest_snapshot(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<SnapshotRecord>, DomainError> {
        let row = sqlx::query(
            "SELECT * FROM chronicle_snapshots
             WHERE aggregate_id = $1
             ORDER BY version DESC
             LIMIT 1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(infra)?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn latest_snapshot_at_or_below(
        &self,
        aggregate_id: Uuid,
        max_version: i64,
    ) -> Result<Option<SnapshotRecord>, DomainError> {
        let row = sqlx::query(
            "SELECT * FROM chronicle_snapshots
             WHERE aggregate_id = $1 AND version <= $2
             ORDER BY version DESC
             LIMIT 1",
        )
        .bind(aggregate_id)
        .bind(max_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(infra)?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn prune_snapshots(&self, aggregate_id: Uuid, keep: usize) -> Result<(), DomainError> {
        sqlx::query(
            "DELETE FROM chronicle_snapshots
             WHERE aggregate_id = $1
               AND version NOT IN (
                   SELECT version FROM chronicle_snapshots
                   WHERE aggregate_id = $1
                   ORDER BY version DESC
                   LIMIT $2
               )",
        )
        .bind(aggregate_id)
        .bind(limit_to_i64(keep.max(1)))
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgEventStore {
    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEntry>, DomainError> {
        let rows = sqlx::query(
            "SELECT * FROM chronicle_outbox
             WHERE processed_at IS NULL
               AND attempts < $3
               AND (next_retry_at IS NULL OR next_retry_at <= $1)
             ORDER BY global_sequence
             LIMIT $2",
        )
        .bind(now)
        .bind(limit_to_i64(batch_size))
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        // Guarded by processed_at IS NULL so the mark is set exactly once.
        let result = sqlx::query(
            "UPDATE chronicle_outbox
             SET processed_at = $2
             WHERE event_id = $1 AND processed_at IS NULL",
        )
        .bind(event_id)
        .bind(processed_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        // Zero rows is either a late duplicate ack (a no-op) or a missing
        // entry, which is an error.
        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM chronicle_outbox WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(infra)?;
            if exists.is_none() {
                return Err(DomainError::Infrastructure(format!(
                    "outbox entry not found: {event_id}"
                )));
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        event_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            "UPDATE chronicle_outbox
             SET attempts = attempts + 1, last_error = $2, next_retry_at = $3
             WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::Infrastructure(format!(
                "outbox entry not found: {event_id}"
            )));
        }
        Ok(())
    }

    async fn exhausted_entries(&self, max_attempts: i32) -> Result<Vec<OutboxEntry>, DomainError> {
        let rows = sqlx::query(
            "SELECT * FROM chronicle_outbox
             WHERE processed_at IS NULL AND attempts >= $1
             ORDER BY global_sequence",
        )
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        rows.iter().map(outbox_from_row).collect()
    }

    async fn pending_count(&self) -> Result<usize, DomainError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS pending FROM chronicle_outbox WHERE processed_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(infra)?;

        let pending: i64 = row.try_get("pending").map_err(infra)?;
        usize::try_from(pending)
            .map_err(|e| DomainError::Infrastructure(format!("pending count overflow: {e}")))
    }
}
