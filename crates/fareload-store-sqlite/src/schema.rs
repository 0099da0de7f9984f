//! SQL schema for the fareload SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Versions of fare records. Rows are never deleted; a version is closed by
-- clearing is_active, after which it is immutable.
CREATE TABLE IF NOT EXISTS fare_records (
    record_id           TEXT PRIMARY KEY,
    dataset             TEXT NOT NULL,
    business_key        TEXT NOT NULL,
    content_hash        TEXT NOT NULL,
    record_json         TEXT NOT NULL,   -- full FareRecord as JSON
    airline             TEXT NOT NULL,
    source_code         TEXT NOT NULL,
    destination_code    TEXT NOT NULL,
    departure_datetime  TEXT NOT NULL,
    travel_class        TEXT NOT NULL,
    booking_source      TEXT NOT NULL,
    total_fare_bdt      REAL,
    season_category     TEXT NOT NULL,   -- 'PEAK' | 'OFF_PEAK' | 'REGULAR' | 'OTHER'
    is_active           INTEGER NOT NULL CHECK (is_active IN (0, 1)),
    ingestion_timestamp TEXT NOT NULL,   -- RFC 3339 UTC; server-assigned
    deactivated_at      TEXT,
    run_id              TEXT NOT NULL,
    supersedes          TEXT REFERENCES fare_records(record_id)
);

-- At most one active version per business key.
CREATE UNIQUE INDEX IF NOT EXISTS fare_records_active_key
    ON fare_records(dataset, business_key) WHERE is_active = 1;
CREATE INDEX IF NOT EXISTS fare_records_key_idx
    ON fare_records(dataset, business_key);

CREATE TRIGGER IF NOT EXISTS fare_records_no_delete
BEFORE DELETE ON fare_records
BEGIN
    SELECT RAISE(ABORT, 'fare_records is append-only');
END;

CREATE TRIGGER IF NOT EXISTS fare_records_closed_immutable
BEFORE UPDATE ON fare_records
WHEN OLD.is_active = 0
BEGIN
    SELECT RAISE(ABORT, 'closed record versions are immutable');
END;

-- One immutable row per successful run.
CREATE TABLE IF NOT EXISTS load_metadata (
    run_id                TEXT PRIMARY KEY,
    dataset               TEXT NOT NULL,
    load_timestamp        TEXT NOT NULL,
    load_type             TEXT NOT NULL,   -- 'FULL' | 'INCREMENTAL'
    records_inserted      INTEGER NOT NULL,
    records_updated       INTEGER NOT NULL,
    records_deleted       INTEGER NOT NULL,
    records_unchanged     INTEGER NOT NULL,
    records_rejected      INTEGER NOT NULL,
    duplicate_keys        INTEGER NOT NULL,
    previous_active_count INTEGER NOT NULL,
    change_percentage     REAL NOT NULL,
    started_at            TEXT NOT NULL,
    execution_time_ms     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS load_metadata_dataset_idx
    ON load_metadata(dataset, load_timestamp);

CREATE TRIGGER IF NOT EXISTS load_metadata_no_update
BEFORE UPDATE ON load_metadata
BEGIN
    SELECT RAISE(ABORT, 'load_metadata is immutable');
END;

CREATE TRIGGER IF NOT EXISTS load_metadata_no_delete
BEFORE DELETE ON load_metadata
BEGIN
    SELECT RAISE(ABORT, 'load_metadata is immutable');
END;

-- Written by the training orchestrator; read-only to the reconciler.
CREATE TABLE IF NOT EXISTS model_training_history (
    training_id        TEXT PRIMARY KEY,
    model_name         TEXT NOT NULL,
    model_type         TEXT,
    training_timestamp TEXT NOT NULL,
    test_r2            REAL,
    test_mae           REAL,
    test_rmse          REAL,
    cv_r2_mean         REAL,
    cv_r2_std          REAL,
    is_production      INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS model_training_production_idx
    ON model_training_history(is_production, training_timestamp);

-- Per-dataset run lock. A row whose expires_at has passed is abandoned.
CREATE TABLE IF NOT EXISTS run_locks (
    dataset     TEXT PRIMARY KEY,
    run_id      TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);

PRAGMA user_version = 1;
";
