use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

// `dependents.ref_id` is RESTRICT: a record cannot be deleted while anything
// still points at it.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS records (
    record_id BLOB PRIMARY KEY CHECK (length(record_id) = 16),
    kind TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1)
);
CREATE INDEX IF NOT EXISTS idx_records_kind ON records (kind, created_at);

CREATE TABLE IF NOT EXISTS fields (
    record_id BLOB NOT NULL REFERENCES records (record_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (record_id, field_key)
);

CREATE TABLE IF NOT EXISTS dependents (
    dependent_id BLOB PRIMARY KEY CHECK (length(dependent_id) = 16),
    owner_table TEXT NOT NULL,
    label TEXT NOT NULL,
    ref_id BLOB NOT NULL REFERENCES records (record_id) ON DELETE RESTRICT
);
CREATE INDEX IF NOT EXISTS idx_dependents_ref ON dependents (ref_id);

CREATE TABLE IF NOT EXISTS duplicate_candidates (
    group_key TEXT NOT NULL,
    record_id BLOB NOT NULL REFERENCES records (record_id) ON DELETE CASCADE,
    PRIMARY KEY (group_key, record_id)
);

CREATE TABLE IF NOT EXISTS merge_log (
    rowid INTEGER PRIMARY KEY,
    plan_digest BLOB NOT NULL CHECK (length(plan_digest) = 32),
    kind TEXT NOT NULL,
    survivor_id BLOB NOT NULL CHECK (length(survivor_id) = 16),
    tombstones BLOB NOT NULL,
    reassigned BLOB NOT NULL,
    fields BLOB NOT NULL,
    outcome TEXT NOT NULL,
    failed_phase TEXT,
    recorded_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_merge_log_survivor ON merge_log (survivor_id);
";
