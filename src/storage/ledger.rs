//! The persistent ledger: a durable, ordered store of telemetry records.
//!
//! The ledger is the single source of truth for buffered telemetry. It runs
//! SQLite in WAL mode so every committed transaction is logged before
//! acknowledgment, and serializes all mutations through short-lived
//! IMMEDIATE transactions; concurrent callers queue rather than race.
//!
//! Acquiring `SYNCING` status is the mutual-exclusion mechanism for
//! delivery: [`Ledger::mark_syncing`] only transitions rows that are
//! currently `PENDING`, inside one transaction, so no record is ever owned
//! by two in-flight upload attempts.

use crate::config::TelemetryConfig;
use crate::error::{Error, Result};
use crate::model::{Record, RecordPayload, SyncStatus};
use crate::storage::backup;
use crate::storage::events::{self, EventType};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::time::Duration;

/// Summary counts over the ledger, used by status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub total: usize,
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

/// What happened while opening the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenReport {
    /// Primary store failed its integrity check.
    pub corruption_detected: bool,
    /// A valid snapshot was restored over the primary store.
    pub restored_from_snapshot: bool,
    /// No valid snapshot existed; the store was reset empty.
    pub store_reset: bool,
    /// Crash-stuck `SYNCING` rows reverted to `PENDING`.
    pub reverted_syncing: usize,
    /// `FAILED` rows requeued with a fresh retry budget.
    pub requeued_failed: usize,
}

/// SQLite-backed telemetry ledger.
#[derive(Debug)]
pub struct Ledger {
    conn: Connection,
    operation_timeout: Duration,
    max_retries: i64,
}

impl Ledger {
    /// Open the ledger at the configured path.
    ///
    /// Runs the full recovery protocol:
    /// 1. integrity-check the primary store; on failure restore the most
    ///    recent valid snapshot, or reset empty when none exists
    /// 2. apply pragmas (WAL + configured synchronous level) and schema
    /// 3. revert any crash-stuck `SYNCING` rows to `PENDING`
    /// 4. requeue `FAILED` rows once with a fresh retry budget
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the store directory cannot be
    /// created or the database cannot be opened at all.
    pub fn open(config: &TelemetryConfig) -> Result<(Self, OpenReport)> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::StorageUnavailable {
                reason: format!("cannot create {}: {e}", parent.display()),
            })?;
        }

        let mut report = OpenReport::default();

        if config.db_path.exists() && !integrity_ok(&config.db_path) {
            report.corruption_detected = true;
            tracing::error!(path = %config.db_path.display(), "ledger failed integrity check");

            match backup::restore_snapshot_files(config) {
                Ok(()) => {
                    report.restored_from_snapshot = true;
                    tracing::warn!("ledger restored from snapshot");
                }
                Err(e) => {
                    tracing::error!(error = %e, "no valid snapshot, resetting store");
                    backup::remove_store_files(&config.db_path)?;
                    report.store_reset = true;
                }
            }
        }

        let conn = Connection::open(&config.db_path).map_err(|e| Error::StorageUnavailable {
            reason: format!("cannot open {}: {e}", config.db_path.display()),
        })?;
        conn.busy_timeout(config.operation_timeout)?;
        apply_schema(&conn, config.synchronous)?;

        let mut ledger = Self {
            conn,
            operation_timeout: config.operation_timeout,
            max_retries: config.max_retries,
        };
        ledger.finish_open(&mut report)?;
        Ok((ledger, report))
    }

    /// Open an in-memory ledger (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory(config: &TelemetryConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn, config.synchronous)?;
        Ok(Self {
            conn,
            operation_timeout: config.operation_timeout,
            max_retries: config.max_retries,
        })
    }

    fn finish_open(&mut self, report: &mut OpenReport) -> Result<()> {
        let (reverted, requeued) = self.mutate("open_recovery", |tx| {
            if report.corruption_detected {
                events::insert_event(tx, EventType::CorruptionDetected, None, None)?;
                if report.restored_from_snapshot {
                    events::insert_event(tx, EventType::SnapshotRestored, None, None)?;
                } else if report.store_reset {
                    events::insert_event(tx, EventType::StoreReset, None, None)?;
                }
            }

            // A SYNCING row at open means the previous process died or was
            // backgrounded mid-attempt; the attempt did not complete.
            let reverted = tx.execute(
                "UPDATE records SET sync_status = 'PENDING' WHERE sync_status = 'SYNCING'",
                [],
            )?;

            // FAILED records already escalated once get a fresh retry
            // budget on each launch instead of being abandoned.
            let requeued = tx.execute(
                "UPDATE records SET sync_status = 'PENDING', retry_count = 0
                 WHERE sync_status = 'FAILED'",
                [],
            )?;
            if requeued > 0 {
                events::insert_event(
                    tx,
                    EventType::FailedRequeued,
                    None,
                    Some(&requeued.to_string()),
                )?;
            }

            Ok((reverted, requeued))
        })?;

        report.reverted_syncing = reverted;
        report.requeued_failed = requeued;
        Ok(())
    }

    /// Reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation inside one IMMEDIATE transaction.
    ///
    /// The closure either commits as a whole or rolls back as a whole; a
    /// crash mid-operation leaves the ledger in the pre- or post-state,
    /// never a hybrid. A busy database past the operation timeout surfaces
    /// as `OperationTimeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; the transaction is rolled back.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let timeout_ms = u64::try_from(self.operation_timeout.as_millis()).unwrap_or(u64::MAX);
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(|e| annotate_timeout(e.into(), op, timeout_ms))?;

        let result = f(&tx).map_err(|e| annotate_timeout(e, op, timeout_ms))?;

        tx.commit()
            .map_err(|e| annotate_timeout(e.into(), op, timeout_ms))?;
        Ok(result)
    }

    // ==================
    // Record Operations
    // ==================

    /// Append a record, returning its assigned id.
    ///
    /// Once this returns the record is durable: committed to the WAL and
    /// visible as `PENDING` until synced or evicted.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails or times out.
    pub fn append(&mut self, payload: &RecordPayload, created_at: i64) -> Result<i64> {
        let json = serde_json::to_string(payload)?;
        let kind = payload.kind();

        self.mutate("append", |tx| {
            tx.execute(
                "INSERT INTO records (payload_kind, payload, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![kind, json, created_at],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Try to acquire the given records for an upload attempt.
    ///
    /// Only `PENDING` rows transition to `SYNCING`; the returned set is
    /// exactly the records this caller now owns. Records already `SYNCING`,
    /// `SYNCED`, or `FAILED` are skipped, which makes duplicate delivery of
    /// a batch a no-op from the ledger's perspective.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or times out.
    pub fn mark_syncing(&mut self, ids: &[i64]) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.mutate("mark_syncing", |tx| {
            let mut acquired = Vec::with_capacity(ids.len());
            let mut stmt = tx.prepare(
                "UPDATE records SET sync_status = 'SYNCING'
                 WHERE id = ?1 AND sync_status = 'PENDING'",
            )?;
            for &id in ids {
                if stmt.execute([id])? == 1 {
                    acquired.push(id);
                }
            }
            Ok(acquired)
        })
    }

    /// Mark delivered records as `SYNCED` (terminal).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or times out.
    pub fn mark_synced(&mut self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.mutate("mark_synced", |tx| {
            let mut stmt = tx.prepare(
                "UPDATE records SET sync_status = 'SYNCED'
                 WHERE id = ?1 AND sync_status = 'SYNCING'",
            )?;
            for &id in ids {
                stmt.execute([id])?;
            }
            Ok(())
        })
    }

    /// Record a failed delivery attempt for each id.
    ///
    /// Increments `retry_count`, stamps `last_attempt_at`, and returns the
    /// record to `PENDING`, or to `FAILED` exactly when the incremented
    /// count reaches the retry budget. Returns the ids that exhausted their
    /// budget, for hand-off to the escalation path.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or times out.
    pub fn mark_failed_attempt(&mut self, ids: &[i64], now: i64) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let max_retries = self.max_retries;

        self.mutate("mark_failed_attempt", |tx| {
            let mut exhausted = Vec::new();
            let mut stmt = tx.prepare(
                "UPDATE records SET
                     retry_count = retry_count + 1,
                     last_attempt_at = ?2,
                     sync_status = CASE
                         WHEN retry_count + 1 >= ?3 THEN 'FAILED'
                         ELSE 'PENDING'
                     END
                 WHERE id = ?1 AND sync_status = 'SYNCING'",
            )?;
            let mut check = tx.prepare("SELECT sync_status FROM records WHERE id = ?1")?;

            for &id in ids {
                if stmt.execute(rusqlite::params![id, now, max_retries])? == 0 {
                    continue;
                }
                let status: String = check.query_row([id], |row| row.get(0))?;
                if status == "FAILED" {
                    events::insert_event(tx, EventType::RetryExhausted, Some(id), None)?;
                    exhausted.push(id);
                }
            }
            Ok(exhausted)
        })
    }

    /// Release records acquired for an attempt that never counted.
    ///
    /// Used when the whole batch failed for authorization reasons: absence
    /// of a credential is expected during initial launch and must not eat
    /// into the retry budget. `last_attempt_at` is still stamped so backoff
    /// spacing applies.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or times out.
    pub fn release_unauthorized(&mut self, ids: &[i64], now: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.mutate("release_unauthorized", |tx| {
            let mut stmt = tx.prepare(
                "UPDATE records SET sync_status = 'PENDING', last_attempt_at = ?2
                 WHERE id = ?1 AND sync_status = 'SYNCING'",
            )?;
            for &id in ids {
                stmt.execute(rusqlite::params![id, now])?;
            }
            Ok(())
        })
    }

    /// Mark a `FAILED` record as delivered out of band.
    ///
    /// The escalation path gets one direct delivery attempt after
    /// exhaustion; when it lands, the record is terminal `SYNCED` like any
    /// other delivery. Returns whether the transition happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or times out.
    pub fn mark_escalated_delivered(&mut self, id: i64) -> Result<bool> {
        self.mutate("mark_escalated_delivered", |tx| {
            Ok(tx.execute(
                "UPDATE records SET sync_status = 'SYNCED'
                 WHERE id = ?1 AND sync_status = 'FAILED'",
                [id],
            )? == 1)
        })
    }

    /// Revert every `SYNCING` row to `PENDING`.
    ///
    /// Called on clean cancellation (app backgrounding) so no record is
    /// left stuck mid-attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or times out.
    pub fn revert_syncing(&mut self) -> Result<usize> {
        self.mutate("revert_syncing", |tx| {
            Ok(tx.execute(
                "UPDATE records SET sync_status = 'PENDING' WHERE sync_status = 'SYNCING'",
                [],
            )?)
        })
    }

    /// Oldest-first `PENDING` records, without backoff filtering.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query_pending(&self, limit: u32) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload, created_at, sync_status, retry_count, last_attempt_at
             FROM records WHERE sync_status = 'PENDING'
             ORDER BY id ASC LIMIT ?1",
        )?;
        collect_records(stmt.query_map([limit], map_record_row)?)
    }

    /// Oldest-first `PENDING` records whose linear backoff has elapsed.
    ///
    /// A record with `retry_count = n` becomes due no sooner than
    /// `retry_delay × n` after its last attempt, bounded by `max_backoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query_due(
        &self,
        limit: u32,
        now: i64,
        retry_delay: Duration,
        max_backoff: Duration,
    ) -> Result<Vec<Record>> {
        let delay_ms = i64::try_from(retry_delay.as_millis()).unwrap_or(i64::MAX);
        let max_ms = i64::try_from(max_backoff.as_millis()).unwrap_or(i64::MAX);

        let mut stmt = self.conn.prepare(
            "SELECT id, payload, created_at, sync_status, retry_count, last_attempt_at
             FROM records
             WHERE sync_status = 'PENDING'
               AND (last_attempt_at IS NULL
                    OR last_attempt_at + MIN(retry_count * ?2, ?3) <= ?4)
             ORDER BY id ASC LIMIT ?1",
        )?;
        collect_records(stmt.query_map(
            rusqlite::params![limit, delay_ms, max_ms, now],
            map_record_row,
        )?)
    }

    /// Fetch one record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_record(&self, id: i64) -> Result<Option<Record>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload, created_at, sync_status, retry_count, last_attempt_at
             FROM records WHERE id = ?1",
        )?;
        let record = stmt.query_row([id], map_record_row).optional()?;
        record.map(record_from_row).transpose()
    }

    /// Total record count.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Count of records in one status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_status(&self, status: SyncStatus) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE sync_status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Summary counts across all statuses, in one scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<LedgerStats> {
        self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(sync_status = 'PENDING'), 0),
                    COALESCE(SUM(sync_status = 'SYNCING'), 0),
                    COALESCE(SUM(sync_status = 'SYNCED'), 0),
                    COALESCE(SUM(sync_status = 'FAILED'), 0)
             FROM records",
            [],
            |row| {
                Ok(LedgerStats {
                    total: row.get::<_, i64>(0)?.try_into().unwrap_or(0),
                    pending: row.get::<_, i64>(1)?.try_into().unwrap_or(0),
                    syncing: row.get::<_, i64>(2)?.try_into().unwrap_or(0),
                    synced: row.get::<_, i64>(3)?.try_into().unwrap_or(0),
                    failed: row.get::<_, i64>(4)?.try_into().unwrap_or(0),
                })
            },
        )
        .map_err(Error::from)
    }

    /// Delete the `n` oldest records in one status tier.
    ///
    /// Returns the deleted ids (oldest first). Deleting a non-`SYNCED`
    /// record is data loss of unsent telemetry; the eviction manager is
    /// responsible for emitting the diagnostic events.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails or times out.
    pub fn delete_oldest(&mut self, n: usize, status: SyncStatus) -> Result<Vec<i64>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let emit_event = status != SyncStatus::Synced;

        self.mutate("delete_oldest", |tx| {
            let mut stmt = tx.prepare(
                "SELECT id FROM records WHERE sync_status = ?1 ORDER BY id ASC LIMIT ?2",
            )?;
            let ids: Vec<i64> = stmt
                .query_map(rusqlite::params![status.as_str(), limit], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;

            let mut del = tx.prepare("DELETE FROM records WHERE id = ?1")?;
            for &id in &ids {
                del.execute([id])?;
                if emit_event {
                    events::insert_event(
                        tx,
                        EventType::ForcedEviction,
                        Some(id),
                        Some(status.as_str()),
                    )?;
                }
            }
            Ok(ids)
        })
    }
}

fn annotate_timeout(e: Error, op: &str, timeout_ms: u64) -> Error {
    match e {
        Error::OperationTimeout { .. } => Error::OperationTimeout {
            op: op.to_string(),
            timeout_ms,
        },
        other => other,
    }
}

/// Run `PRAGMA integrity_check` against the file without mutating it.
fn integrity_ok(path: &Path) -> bool {
    let Ok(conn) = Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    ) else {
        return false;
    };
    matches!(
        conn.query_row("PRAGMA integrity_check", [], |row| row.get::<_, String>(0)),
        Ok(ref s) if s == "ok"
    )
}

type RawRow = (i64, String, i64, String, i64, Option<i64>);

fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn record_from_row(raw: RawRow) -> Result<Record> {
    let (id, payload, created_at, status, retry_count, last_attempt_at) = raw;
    Ok(Record {
        id,
        payload: serde_json::from_str(&payload)?,
        created_at,
        sync_status: SyncStatus::parse(&status)
            .ok_or_else(|| Error::Other(format!("unknown sync_status '{status}'")))?,
        retry_count,
        last_attempt_at,
    })
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<RawRow>>,
) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for row in rows {
        records.push(record_from_row(row?)?);
    }
    Ok(records)
}
