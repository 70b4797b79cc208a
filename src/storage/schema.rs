//! Database schema for the telemetry ledger.
//!
//! Timestamps are stored as INTEGER Unix milliseconds. The `records` table
//! is append-only except for the three sync-tracking columns; `id` is
//! AUTOINCREMENT so identifiers are monotonic and never reused even after
//! eviction.

use crate::config::SynchronousMode;
use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the telemetry database.
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Telemetry Records
-- ====================

CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload_kind TEXT NOT NULL CHECK (payload_kind IN ('location', 'error_event')),
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (sync_status IN ('PENDING', 'SYNCING', 'SYNCED', 'FAILED')),
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_attempt_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_records_status ON records(sync_status);
CREATE INDEX IF NOT EXISTS idx_records_status_created ON records(sync_status, created_at);
CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at);

-- ====================
-- Audit Events
-- ====================

-- Diagnostic trail for forced evictions, corruption recovery, escalations.
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    record_id INTEGER,
    detail TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);
";

/// Apply pragmas and schema to the database.
///
/// Idempotent: all statements use `IF NOT EXISTS`. The pragma block puts
/// the store into WAL journal mode with the configured durability level.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection, synchronous: SynchronousMode) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", synchronous.as_str())?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
