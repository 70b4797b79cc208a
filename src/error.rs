//! Error types for the telemetry subsystem.
//!
//! Every public operation in this crate returns a typed outcome; nothing
//! propagates as an unhandled fault into the host application. Errors are
//! classified into a small taxonomy (`ErrorKind`) that drives the retry
//! policy:
//!
//! - **Transient**: retried under backoff up to `max_retries`
//! - **Authorization**: retried on the next cycle, no retry-count penalty
//! - **Capacity**: handled by eviction, never surfaced to the user
//! - **Corruption**: triggers restore-from-backup
//! - **Exhaustion**: record marked `FAILED`, routed to escalation

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for telemetry operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Kind ────────────────────────────────────────────────

/// Coarse classification of an error, used by the retry scheduler
/// and the escalation path to pick a handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network unreachable, timeout, 5xx. Worth retrying with backoff.
    Transient,
    /// Missing or rejected credential. Retried once a credential appears.
    Authorization,
    /// Ledger over its capacity threshold. Resolved by eviction.
    Capacity,
    /// Integrity check failure. Resolved by restore-from-backup.
    Corruption,
    /// Retry budget spent. Terminal for automatic retry.
    Exhaustion,
    /// Everything else (configuration mistakes, programmer errors).
    Fatal,
}

impl ErrorKind {
    /// String form used in audit events and structured logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Authorization => "authorization",
            Self::Capacity => "capacity",
            Self::Corruption => "corruption",
            Self::Exhaustion => "exhaustion",
            Self::Fatal => "fatal",
        }
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in telemetry operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    #[error("Storage operation timed out after {timeout_ms}ms: {op}")]
    OperationTimeout { op: String, timeout_ms: u64 },

    #[error("Ledger integrity check failed: {detail}")]
    Corruption { detail: String },

    #[error("No valid snapshot available at {path}")]
    SnapshotUnavailable { path: PathBuf },

    #[error("Snapshot checksum mismatch for {path}")]
    SnapshotChecksumMismatch { path: PathBuf },

    #[error("No credential available")]
    MissingCredential,

    #[error("Upload rejected with status {status}")]
    UploadRejected { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Retry budget exhausted for record {id} after {attempts} attempts")]
    RetryExhausted { id: i64, attempts: i64 },

    #[error("Record not found: {id}")]
    RecordNotFound { id: i64 },

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        // A busy/locked database is the ledger's operation-timeout signal:
        // the busy handler already waited the configured bound.
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::OperationTimeout {
                    op: "sqlite".to_string(),
                    timeout_ms: 0,
                }
            }
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::DatabaseCorrupt =>
            {
                Self::Corruption {
                    detail: msg
                        .clone()
                        .unwrap_or_else(|| "database disk image is malformed".into()),
                }
            }
            _ => Self::Database(e),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl Error {
    /// Map this error to its taxonomy kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::OperationTimeout { .. } | Self::Network(_) => ErrorKind::Transient,
            Self::UploadRejected { status } => {
                // 5xx is transient; 401/403 waits for a credential;
                // other 4xx is not worth retrying.
                if *status >= 500 {
                    ErrorKind::Transient
                } else if *status == 401 || *status == 403 {
                    ErrorKind::Authorization
                } else {
                    ErrorKind::Fatal
                }
            }
            Self::MissingCredential => ErrorKind::Authorization,
            Self::Corruption { .. }
            | Self::SnapshotUnavailable { .. }
            | Self::SnapshotChecksumMismatch { .. } => ErrorKind::Corruption,
            Self::RetryExhausted { .. } => ErrorKind::Exhaustion,
            Self::StorageUnavailable { .. }
            | Self::RecordNotFound { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Other(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the scheduler should retry the operation on a later cycle.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Authorization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_is_transient() {
        let e = Error::UploadRejected { status: 503 };
        assert_eq!(e.kind(), ErrorKind::Transient);
        assert!(e.is_transient());
    }

    #[test]
    fn test_unauthorized_is_authorization() {
        assert_eq!(
            Error::UploadRejected { status: 401 }.kind(),
            ErrorKind::Authorization
        );
        assert_eq!(Error::MissingCredential.kind(), ErrorKind::Authorization);
        assert!(Error::MissingCredential.is_transient());
    }

    #[test]
    fn test_client_error_is_fatal() {
        let e = Error::UploadRejected { status: 404 };
        assert_eq!(e.kind(), ErrorKind::Fatal);
        assert!(!e.is_transient());
    }

    #[test]
    fn test_exhaustion_kind() {
        let e = Error::RetryExhausted { id: 7, attempts: 3 };
        assert_eq!(e.kind(), ErrorKind::Exhaustion);
        assert!(!e.is_transient());
    }
}
