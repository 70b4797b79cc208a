//! Audit event storage.
//!
//! Events record the subsystem's exceptional moments (forced evictions of
//! unsent data, corruption recovery, escalations) so a later `status`
//! inspection can explain where records went. Inserts share the mutating
//! transaction of the operation that produced them.

use rusqlite::{Connection, Result};

/// Event types for the diagnostic trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A not-yet-synced record was removed to stay under capacity.
    ForcedEviction,
    /// Retry budget exhausted; record handed to escalation.
    RetryExhausted,
    /// Escalation fell back to the user-visible notification.
    EscalationNotified,
    /// Primary store failed its integrity check.
    CorruptionDetected,
    /// Ledger restored from a snapshot.
    SnapshotRestored,
    /// No valid snapshot existed; store was reset empty.
    StoreReset,
    /// FAILED records requeued for a fresh retry budget on open.
    FailedRequeued,
}

impl EventType {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ForcedEviction => "forced_eviction",
            Self::RetryExhausted => "retry_exhausted",
            Self::EscalationNotified => "escalation_notified",
            Self::CorruptionDetected => "corruption_detected",
            Self::SnapshotRestored => "snapshot_restored",
            Self::StoreReset => "store_reset",
            Self::FailedRequeued => "failed_requeued",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "forced_eviction" => Some(Self::ForcedEviction),
            "retry_exhausted" => Some(Self::RetryExhausted),
            "escalation_notified" => Some(Self::EscalationNotified),
            "corruption_detected" => Some(Self::CorruptionDetected),
            "snapshot_restored" => Some(Self::SnapshotRestored),
            "store_reset" => Some(Self::StoreReset),
            "failed_requeued" => Some(Self::FailedRequeued),
            _ => None,
        }
    }
}

/// One audit event row.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub event_type: EventType,
    /// Affected record, when the event concerns a single one.
    pub record_id: Option<i64>,
    pub detail: Option<String>,
    pub created_at: i64,
}

/// Insert an event.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_event(
    conn: &Connection,
    event_type: EventType,
    record_id: Option<i64>,
    detail: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (event_type, record_id, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            event_type.as_str(),
            record_id,
            detail,
            chrono::Utc::now().timestamp_millis()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent events, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn recent_events(conn: &Connection, limit: u32) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_type, record_id, detail, created_at
         FROM events ORDER BY created_at DESC, id DESC LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit], |row| {
        let raw: String = row.get(1)?;
        Ok(Event {
            id: row.get(0)?,
            // Unknown types from a newer schema degrade to a reset marker
            event_type: EventType::parse(&raw).unwrap_or(EventType::StoreReset),
            record_id: row.get(2)?,
            detail: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;

    rows.collect()
}

/// Count events of one type.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_events(conn: &Connection, event_type: EventType) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM events WHERE event_type = ?1",
        [event_type.as_str()],
        |row| row.get(0),
    )
}
