//! Periodic snapshot/restore of the ledger's durable file.
//!
//! Snapshots are taken with SQLite's online backup API against the live
//! connection, written to a temporary file, checksummed with SHA-256, and
//! renamed into place together with their sidecar. On a corrupt open, the
//! snapshot is restored only if its sidecar checksum still matches;
//! records created after the last snapshot are lost by design (bounded
//! recovery-point objective, not zero-loss).

use crate::config::TelemetryConfig;
use crate::error::{Error, Result};
use crate::storage::ledger::Ledger;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Drives the snapshot cadence and the restore path.
#[derive(Debug, Clone)]
pub struct BackupManager {
    enabled: bool,
    interval: Duration,
    snapshot_path: PathBuf,
    checksum_path: PathBuf,
}

impl BackupManager {
    #[must_use]
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            enabled: config.backup_enabled,
            interval: config.backup_interval,
            snapshot_path: config.snapshot_path(),
            checksum_path: config.snapshot_checksum_path(),
        }
    }

    /// Whether the backup interval has elapsed since the last snapshot.
    ///
    /// Keyed off the snapshot file's mtime so the cadence survives process
    /// restarts.
    #[must_use]
    pub fn is_due(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let Ok(meta) = std::fs::metadata(&self.snapshot_path) else {
            return true;
        };
        match meta.modified().map(|m| SystemTime::now().duration_since(m)) {
            Ok(Ok(age)) => age >= self.interval,
            _ => true,
        }
    }

    /// Snapshot now if the interval has elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot fails.
    pub fn snapshot_if_due(&self, ledger: &Ledger) -> Result<bool> {
        if !self.is_due() {
            return Ok(false);
        }
        self.snapshot(ledger)?;
        Ok(true)
    }

    /// Take a snapshot of the live ledger.
    ///
    /// Uses the online backup API, so normal writes keep flowing; the
    /// resulting file is a consistent point-in-time copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup, checksum, or rename fails.
    pub fn snapshot(&self, ledger: &Ledger) -> Result<()> {
        let tmp = self.snapshot_path.with_extension("snapshot.tmp");

        {
            let mut dst = rusqlite::Connection::open(&tmp)?;
            let backup = rusqlite::backup::Backup::new(ledger.conn(), &mut dst)?;
            backup.run_to_completion(64, Duration::from_millis(25), None)?;
        }

        let digest = file_sha256(&tmp)?;
        let tmp_sum = self.checksum_path.with_extension("sha256.tmp");
        std::fs::write(&tmp_sum, &digest)?;

        std::fs::rename(&tmp, &self.snapshot_path)?;
        std::fs::rename(&tmp_sum, &self.checksum_path)?;

        tracing::info!(path = %self.snapshot_path.display(), "ledger snapshot written");
        Ok(())
    }

    /// Verify that a snapshot exists and matches its checksum sidecar.
    ///
    /// # Errors
    ///
    /// `SnapshotUnavailable` when the files are missing,
    /// `SnapshotChecksumMismatch` when the content has rotted.
    pub fn verify(&self) -> Result<()> {
        verify_files(&self.snapshot_path, &self.checksum_path)
    }
}

/// Restore the most recent valid snapshot over the primary store.
///
/// Free function so the ledger's open path can run it before any
/// connection exists. Removes the WAL companion files, which belong to the
/// discarded (corrupt) primary.
///
/// # Errors
///
/// Returns an error if no valid snapshot exists or the copy fails.
pub fn restore_snapshot_files(config: &TelemetryConfig) -> Result<()> {
    let snapshot = config.snapshot_path();
    verify_files(&snapshot, &config.snapshot_checksum_path())?;

    remove_store_files(&config.db_path)?;
    std::fs::copy(&snapshot, &config.db_path)?;
    Ok(())
}

/// Remove the primary store and its WAL companions.
///
/// # Errors
///
/// Returns an error if a removal fails for reasons other than absence.
pub fn remove_store_files(db_path: &Path) -> Result<()> {
    for path in [
        db_path.to_path_buf(),
        companion(db_path, "-wal"),
        companion(db_path, "-shm"),
    ] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn companion(db_path: &Path, suffix: &str) -> PathBuf {
    let mut s = db_path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn verify_files(snapshot: &Path, checksum: &Path) -> Result<()> {
    if !snapshot.exists() {
        return Err(Error::SnapshotUnavailable {
            path: snapshot.to_path_buf(),
        });
    }
    let expected = std::fs::read_to_string(checksum).map_err(|_| Error::SnapshotUnavailable {
        path: checksum.to_path_buf(),
    })?;
    let actual = file_sha256(snapshot)?;
    if expected.trim() != actual {
        return Err(Error::SnapshotChecksumMismatch {
            path: snapshot.to_path_buf(),
        });
    }
    Ok(())
}

/// Streamed SHA-256 of a file, as lowercase hex.
fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
