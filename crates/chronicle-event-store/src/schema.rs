//! Event store database schema.
//!
//! The same statements live under `migrations/` for `sqlx migrate`; these
//! constants exist for embedded setup in tools and tests.

/// SQL to create the events table.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS chronicle_events (
    event_id        UUID PRIMARY KEY,
    aggregate_id    UUID NOT NULL,
    aggregate_type  VARCHAR(255) NOT NULL,
    event_type      VARCHAR(255) NOT NULL,
    version         BIGINT NOT NULL,
    schema_version  INT NOT NULL DEFAULT 1,
    payload         JSONB NOT NULL,
    metadata        JSONB NOT NULL DEFAULT '{}'::jsonb,
    user_id         UUID,
    correlation_id  UUID NOT NULL,
    causation_id    UUID NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    persisted_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    global_sequence BIGSERIAL,
    UNIQUE (aggregate_id, version)
);

CREATE INDEX IF NOT EXISTS idx_chronicle_events_aggregate
    ON chronicle_events (aggregate_id, version);

CREATE INDEX IF NOT EXISTS idx_chronicle_events_correlation_id
    ON chronicle_events (correlation_id);

CREATE INDEX IF NOT EXISTS idx_chronicle_events_type_sequence
    ON chronicle_events (event_type, global_sequence);

CREATE INDEX IF NOT EXISTS idx_chronicle_events_global_sequence
    ON chronicle_events (global_sequence);
";

/// SQL to create the snapshots table.
pub const CREATE_SNAPSHOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS chronicle_snapshots (
    aggregate_id    UUID NOT NULL,
    aggregate_type  VARCHAR(255) NOT NULL,
    version         BIGINT NOT NULL,
    payload         JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (aggregate_id, version)
);
";

/// SQL to create the outbox table.
pub const CREATE_OUTBOX_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS chronicle_outbox (
    event_id        UUID PRIMARY KEY REFERENCES chronicle_events (event_id),
    aggregate_id    UUID NOT NULL,
    event_type      VARCHAR(255) NOT NULL,
    payload         JSONB NOT NULL,
    global_sequence BIGINT NOT NULL,
    correlation_id  UUID NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    processed_at    TIMESTAMPTZ,
    attempts        INT NOT NULL DEFAULT 0,
    last_error      TEXT,
    next_retry_at   TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_chronicle_outbox_due
    ON chronicle_outbox (global_sequence)
    WHERE processed_at IS NULL;
";
