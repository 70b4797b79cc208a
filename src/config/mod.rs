//! Configuration for the telemetry subsystem.
//!
//! All tuning knobs live on [`TelemetryConfig`], which the host application
//! constructs once at startup and passes to every collaborator. The library
//! has no hidden defaults; [`TelemetryConfig::recommended`] exists for
//! callers (like the `triptel` binary) that want the tracker's shipped
//! values spelled out in one place.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durability mode for the SQLite `synchronous` pragma.
///
/// `Normal` logs every committed transaction to the WAL before
/// acknowledgment but relaxes fsync-on-every-write: an abrupt power loss
/// can lose the most recent uncheckpointed transactions, never corrupt
/// older committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronousMode {
    Off,
    Normal,
    Full,
}

impl SynchronousMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Caller-supplied configuration surface for the whole subsystem.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Path of the primary store file (WAL companions live alongside).
    pub db_path: PathBuf,
    /// Remote API base URL, e.g. `https://api.example.com`.
    pub api_base_url: String,

    /// Delivery attempts before a record is marked `FAILED`.
    pub max_retries: i64,
    /// Base backoff unit; attempt `n` waits at least `retry_delay × n`.
    pub retry_delay: Duration,
    /// Upper bound on the computed backoff delay.
    pub max_backoff: Duration,
    /// Bound on every individual storage call.
    pub operation_timeout: Duration,
    /// Interval between scheduler cycles.
    pub sync_interval: Duration,
    /// Oldest-first batch size per sync cycle.
    pub batch_size: u32,

    pub backup_enabled: bool,
    /// Interval between ledger snapshots.
    pub backup_interval: Duration,

    pub cleanup_enabled: bool,
    /// Maximum record count before pruning runs.
    pub max_records: usize,
    /// Prune when `count / max_records` reaches this fraction.
    pub cleanup_threshold: f64,

    /// Durability mode for the store.
    pub synchronous: SynchronousMode,
}

impl TelemetryConfig {
    /// The values the tracker ships with: 3 retries at 1s linear backoff
    /// (capped at 60s), 10s operation timeout, 30s sync cadence, 24h
    /// backups, and cleanup at 80% of 10 000 records.
    #[must_use]
    pub fn recommended(db_path: PathBuf, api_base_url: String) -> Self {
        Self {
            db_path,
            api_base_url,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(30),
            batch_size: 50,
            backup_enabled: true,
            backup_interval: Duration::from_secs(24 * 60 * 60),
            cleanup_enabled: true,
            max_records: 10_000,
            cleanup_threshold: 0.8,
            synchronous: SynchronousMode::Normal,
        }
    }

    /// Validate the configuration before wiring up collaborators.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for values that would make the subsystem
    /// misbehave (zero capacity, threshold outside `(0, 1]`, empty URL).
    pub fn validate(&self) -> Result<()> {
        if self.max_records == 0 {
            return Err(Error::Config("max_records must be at least 1".into()));
        }
        if !(self.cleanup_threshold > 0.0 && self.cleanup_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "cleanup_threshold must be in (0, 1], got {}",
                self.cleanup_threshold
            )));
        }
        if self.max_retries < 1 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(Error::Config("api_base_url must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Snapshot file path: the primary store path with `.snapshot` appended.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        append_extension(&self.db_path, "snapshot")
    }

    /// Checksum sidecar path for the snapshot.
    #[must_use]
    pub fn snapshot_checksum_path(&self) -> PathBuf {
        append_extension(&self.db_path, "snapshot.sha256")
    }
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Default app-private data directory for the telemetry store.
///
/// Returns `<platform data dir>/tracetrip/telemetry.db`, or `None` when no
/// home directory can be resolved. The library never falls back to this
/// silently; it is a convenience for binaries.
#[must_use]
pub fn default_db_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "tracetrip", "tracetrip")
        .map(|dirs| dirs.data_dir().join("telemetry.db"))
}
