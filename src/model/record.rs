//! Telemetry record types.
//!
//! A [`Record`] is one buffered telemetry datum: either a GPS breadcrumb
//! ([`LocationFix`]) or an operational error event ([`ErrorEvent`]).
//! Records are immutable after append except for the three sync-tracking
//! fields (`sync_status`, `retry_count`, `last_attempt_at`), which only the
//! ledger mutates.

use serde::{Deserialize, Serialize};

/// Per-record delivery state.
///
/// Lifecycle: `Pending → Syncing → {Synced | Pending(retry+1) | Failed}`.
/// `Synced` and `Failed` are terminal for the scheduler; either may still
/// be removed by eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    /// Storage representation (matches the CHECK constraint in the schema).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Syncing => "SYNCING",
            Self::Synced => "SYNCED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SYNCING" => Some(Self::Syncing),
            "SYNCED" => Some(Self::Synced),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GPS breadcrumb captured by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

/// An operational error captured at an exception site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Error name/class, e.g. `"LocationTimeout"`.
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Free-form context, e.g. `{"type": "location_tracking"}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ErrorEvent {
    /// Build an event with a context tag, matching the capture sites
    /// (`location_tracking`, `api_request`, `database_operation`).
    #[must_use]
    pub fn with_context_type(error: &str, message: &str, context_type: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            stack: None,
            context: Some(serde_json::json!({ "type": context_type })),
        }
    }
}

/// The payload of a telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Location(LocationFix),
    ErrorEvent(ErrorEvent),
}

impl RecordPayload {
    /// Storage discriminant, also used to pick the upload endpoint.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Location(_) => "location",
            Self::ErrorEvent(_) => "error_event",
        }
    }
}

/// One buffered telemetry record as stored in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Monotonically increasing, assigned at append, never reused.
    pub id: i64,
    pub payload: RecordPayload,
    /// Capture timestamp, device-clock milliseconds since epoch.
    pub created_at: i64,
    pub sync_status: SyncStatus,
    /// Delivery attempts made so far.
    pub retry_count: i64,
    /// Timestamp of the most recent delivery attempt.
    pub last_attempt_at: Option<i64>,
}
