//! Shared subsystem state: configuration, the ledger, and the host seams.
//!
//! A [`TelemetryContext`] is built once at startup and shared behind an
//! `Arc`. Producers call the enqueue methods from any task; the ledger sits
//! behind an async mutex so appends and sync cycles serialize instead of
//! racing.

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::model::{ErrorEvent, LocationFix, RecordPayload};
use crate::storage::events::{self, Event};
use crate::storage::ledger::OpenReport;
use crate::storage::{BackupManager, EvictionManager, Ledger, LedgerStats};
use crate::sync::{ConnectivityMonitor, CredentialSource, Notifier, Uploader};
use tokio::sync::Mutex;

/// Everything the producers, scheduler, and escalation path share.
pub struct TelemetryContext<U, M, C, N> {
    pub(crate) config: TelemetryConfig,
    pub(crate) ledger: Mutex<Ledger>,
    pub(crate) uploader: U,
    pub(crate) monitor: M,
    pub(crate) credentials: C,
    pub(crate) notifier: N,
    pub(crate) eviction: EvictionManager,
    pub(crate) backup: BackupManager,
}

impl<U, M, C, N> TelemetryContext<U, M, C, N>
where
    U: Uploader,
    M: ConnectivityMonitor,
    C: CredentialSource,
    N: Notifier,
{
    /// Open the subsystem at the configured store path.
    ///
    /// Runs the ledger's full recovery protocol; the returned [`OpenReport`]
    /// says what recovery did.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be opened.
    pub fn open(
        config: TelemetryConfig,
        uploader: U,
        monitor: M,
        credentials: C,
        notifier: N,
    ) -> Result<(Self, OpenReport)> {
        config.validate()?;
        let (ledger, report) = Ledger::open(&config)?;
        let eviction = EvictionManager::new(&config);
        let backup = BackupManager::new(&config);
        Ok((
            Self {
                config,
                ledger: Mutex::new(ledger),
                uploader,
                monitor,
                credentials,
                notifier,
                eviction,
                backup,
            },
            report,
        ))
    }

    /// Open over an in-memory ledger (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn open_memory(
        config: TelemetryConfig,
        uploader: U,
        monitor: M,
        credentials: C,
        notifier: N,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = Ledger::open_memory(&config)?;
        let eviction = EvictionManager::new(&config);
        let backup = BackupManager::new(&config);
        Ok(Self {
            config,
            ledger: Mutex::new(ledger),
            uploader,
            monitor,
            credentials,
            notifier,
            eviction,
            backup,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Buffer a GPS fix, returning its record id.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails or times out.
    pub async fn enqueue_location(&self, fix: LocationFix) -> Result<i64> {
        self.enqueue(RecordPayload::Location(fix)).await
    }

    /// Buffer an error event, returning its record id.
    ///
    /// For the capture path that tries immediate delivery first, see
    /// [`TelemetryContext::capture_error`].
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails or times out.
    pub async fn enqueue_error(&self, event: ErrorEvent) -> Result<i64> {
        self.enqueue(RecordPayload::ErrorEvent(event)).await
    }

    /// Append a payload and enforce the capacity bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or eviction pass fails.
    pub async fn enqueue(&self, payload: RecordPayload) -> Result<i64> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let mut ledger = self.ledger.lock().await;
        let id = ledger.append(&payload, created_at)?;
        self.eviction.enforce(&mut ledger)?;
        Ok(id)
    }

    /// Summary counts across all sync statuses.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn stats(&self) -> Result<LedgerStats> {
        self.ledger.lock().await.stats()
    }

    /// Most recent audit events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn recent_events(&self, limit: u32) -> Result<Vec<Event>> {
        let ledger = self.ledger.lock().await;
        Ok(events::recent_events(ledger.conn(), limit)?)
    }

    /// Take a snapshot now, regardless of the backup cadence.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot fails.
    pub async fn snapshot_now(&self) -> Result<()> {
        let ledger = self.ledger.lock().await;
        self.backup.snapshot(&ledger)
    }

    /// Release any in-flight records before the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn shutdown(&self) -> Result<usize> {
        self.ledger.lock().await.revert_syncing()
    }
}
