//! The retry scheduler: periodic sync cycles over the ledger.
//!
//! Each cycle acquires a batch of due records under the ledger lock,
//! uploads them with the lock released, then applies the per-record
//! outcomes in a second locked section. Housekeeping (eviction, the backup
//! cadence) runs at the end of every cycle, including empty ones.

use crate::context::TelemetryContext;
use crate::error::Result;
use crate::model::Record;
use crate::sync::{ConnectivityMonitor, CredentialSource, Notifier, UploadOutcome, Uploader};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// What one sync cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Device offline; nothing was attempted.
    pub skipped_offline: bool,
    /// Records acquired for this cycle.
    pub attempted: usize,
    /// Accepted by the server and marked `SYNCED`.
    pub delivered: usize,
    /// Returned to `PENDING` without retry penalty (credential missing or
    /// rejected).
    pub deferred: usize,
    /// Failed transiently and requeued with an incremented retry count.
    pub retried: usize,
    /// Exhausted their retry budget this cycle.
    pub exhausted: usize,
    /// Removed by the capacity bound.
    pub evicted: usize,
    /// A periodic snapshot was taken.
    pub snapshot_taken: bool,
}

/// Drives sync cycles on the configured interval.
pub struct RetryScheduler<U, M, C, N> {
    context: Arc<TelemetryContext<U, M, C, N>>,
}

impl<U, M, C, N> RetryScheduler<U, M, C, N>
where
    U: Uploader,
    M: ConnectivityMonitor,
    C: CredentialSource,
    N: Notifier,
{
    #[must_use]
    pub fn new(context: Arc<TelemetryContext<U, M, C, N>>) -> Self {
        Self { context }
    }

    /// Run one sync cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger operation fails; upload failures are
    /// not errors, they feed the retry machinery.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let ctx = &self.context;
        let cycle = Uuid::new_v4();
        let mut report = CycleReport::default();

        if !ctx.monitor.is_online() {
            report.skipped_offline = true;
            tracing::debug!(%cycle, "offline, cycle skipped");
            return Ok(report);
        }

        let batch = self.acquire_batch().await?;
        if !batch.is_empty() {
            report.attempted = batch.len();
            let token = ctx.credentials.token();
            let outcomes = ctx.uploader.upload(&batch, token.as_deref()).await;
            self.apply_outcomes(outcomes, &mut report).await?;
        }

        {
            let mut ledger = ctx.ledger.lock().await;
            report.evicted = ctx.eviction.enforce(&mut ledger)?.total();
            report.snapshot_taken = ctx.backup.snapshot_if_due(&ledger)?;
        }

        if report.attempted > 0 {
            tracing::info!(
                %cycle,
                attempted = report.attempted,
                delivered = report.delivered,
                deferred = report.deferred,
                retried = report.retried,
                exhausted = report.exhausted,
                "sync cycle finished"
            );
        }
        Ok(report)
    }

    /// Acquire due records, transitioning them to `SYNCING`.
    ///
    /// Only the records actually acquired are returned; anything another
    /// in-flight attempt owns is skipped.
    async fn acquire_batch(&self) -> Result<Vec<Record>> {
        let cfg = &self.context.config;
        let now = chrono::Utc::now().timestamp_millis();

        let mut ledger = self.context.ledger.lock().await;
        let due = ledger.query_due(cfg.batch_size, now, cfg.retry_delay, cfg.max_backoff)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = due.iter().map(|r| r.id).collect();
        let acquired = ledger.mark_syncing(&ids)?;
        Ok(due
            .into_iter()
            .filter(|r| acquired.contains(&r.id))
            .collect())
    }

    async fn apply_outcomes(
        &self,
        outcomes: Vec<(i64, UploadOutcome)>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let mut delivered = Vec::new();
        let mut transient = Vec::new();
        let mut unauthorized = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                UploadOutcome::Delivered => delivered.push(id),
                UploadOutcome::Transient => transient.push(id),
                UploadOutcome::Unauthorized => unauthorized.push(id),
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut ledger = self.context.ledger.lock().await;
        ledger.mark_synced(&delivered)?;
        ledger.release_unauthorized(&unauthorized, now)?;
        let exhausted = ledger.mark_failed_attempt(&transient, now)?;

        report.delivered = delivered.len();
        report.deferred = unauthorized.len();
        report.retried = transient.len() - exhausted.len();
        report.exhausted = exhausted.len();

        // Escalation uploads run with the lock released, like batch uploads.
        let mut records = Vec::with_capacity(exhausted.len());
        for id in exhausted {
            if let Some(record) = ledger.get_record(id)? {
                records.push(record);
            }
        }
        drop(ledger);
        for record in &records {
            self.context.escalate_exhausted(record).await?;
        }
        Ok(())
    }

    /// Run cycles on the configured interval until `shutdown` fires.
    ///
    /// On shutdown, in-flight records are released back to `PENDING` before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown release fails; cycle errors are
    /// logged and do not stop the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut interval = tokio::time::interval(self.context.config.sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!(error = %e, "sync cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    let reverted = self.context.shutdown().await?;
                    if reverted > 0 {
                        tracing::debug!(reverted, "released in-flight records on shutdown");
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::model::{ErrorEvent, LocationFix, RecordPayload};
    use crate::storage::events::{self, EventType};
    use crate::sync::StaticToken;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedUploader {
        outcome: UploadOutcome,
        calls: AtomicUsize,
    }

    impl FixedUploader {
        fn new(outcome: UploadOutcome) -> Self {
            Self {
                outcome,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Uploader for FixedUploader {
        async fn upload(
            &self,
            batch: &[Record],
            token: Option<&str>,
        ) -> Vec<(i64, UploadOutcome)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = if token.is_none() {
                UploadOutcome::Unauthorized
            } else {
                self.outcome
            };
            batch.iter().map(|r| (r.id, outcome)).collect()
        }
    }

    struct SwitchableMonitor(AtomicBool);

    impl ConnectivityMonitor for SwitchableMonitor {
        fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, _title: &str, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn config() -> TelemetryConfig {
        let mut cfg = TelemetryConfig::recommended(
            PathBuf::from("unused"),
            "https://api.test".into(),
        );
        cfg.backup_enabled = false;
        // Zero backoff so consecutive test cycles see the records as due.
        cfg.retry_delay = Duration::ZERO;
        cfg
    }

    fn location() -> RecordPayload {
        RecordPayload::Location(LocationFix {
            latitude: -23.55,
            longitude: -46.63,
            accuracy: None,
            altitude: None,
            speed: None,
            heading: None,
        })
    }

    fn scheduler(
        uploader: FixedUploader,
        online: bool,
        token: Option<&str>,
    ) -> RetryScheduler<FixedUploader, SwitchableMonitor, StaticToken, RecordingNotifier> {
        let ctx = TelemetryContext::open_memory(
            config(),
            uploader,
            SwitchableMonitor(AtomicBool::new(online)),
            StaticToken(token.map(String::from)),
            RecordingNotifier::default(),
        )
        .unwrap();
        RetryScheduler::new(Arc::new(ctx))
    }

    #[tokio::test]
    async fn test_offline_cycle_attempts_nothing() {
        let sched = scheduler(FixedUploader::new(UploadOutcome::Delivered), false, Some("tok"));
        sched.context.enqueue(location()).await.unwrap();

        let report = sched.run_cycle().await.unwrap();
        assert!(report.skipped_offline);
        assert_eq!(report.attempted, 0);
        assert_eq!(sched.context.uploader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sched.context.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_buffered_records_drain_when_back_online() {
        let sched = scheduler(FixedUploader::new(UploadOutcome::Delivered), false, Some("tok"));
        for _ in 0..5 {
            sched.context.enqueue(location()).await.unwrap();
        }
        assert!(sched.run_cycle().await.unwrap().skipped_offline);

        // Connectivity returns; the next cycle drains the whole buffer.
        sched.context.monitor.0.store(true, Ordering::SeqCst);
        let report = sched.run_cycle().await.unwrap();
        assert_eq!(report.attempted, 5);
        assert_eq!(report.delivered, 5);

        let stats = sched.context.stats().await.unwrap();
        assert_eq!(stats.synced, 5);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_after_budget() {
        // max_retries = 3: two retrying cycles, the third exhausts.
        let sched = scheduler(FixedUploader::new(UploadOutcome::Transient), true, Some("tok"));
        sched
            .context
            .enqueue(RecordPayload::ErrorEvent(ErrorEvent::with_context_type(
                "DbError",
                "disk full",
                "database_operation",
            )))
            .await
            .unwrap();

        for cycle in 1..=2 {
            let report = sched.run_cycle().await.unwrap();
            assert_eq!(report.retried, 1, "cycle {cycle} should requeue");
            assert_eq!(report.exhausted, 0);
        }

        let report = sched.run_cycle().await.unwrap();
        assert_eq!(report.exhausted, 1);

        // The record is FAILED, the user was told once, and the audit trail
        // has the escalation.
        let stats = sched.context.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(
            sched.context.notifier.messages.lock().unwrap().len(),
            1
        );
        {
            let ledger = sched.context.ledger.lock().await;
            assert_eq!(
                events::count_events(ledger.conn(), EventType::EscalationNotified).unwrap(),
                1
            );
        }

        // FAILED is terminal for the scheduler; a fourth cycle finds nothing.
        // Three batch uploads plus the one out-of-band escalation attempt.
        let report = sched.run_cycle().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(sched.context.uploader.calls.load(Ordering::SeqCst), 4);
    }

    struct FlakyUploader {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl Uploader for FlakyUploader {
        async fn upload(
            &self,
            batch: &[Record],
            _token: Option<&str>,
        ) -> Vec<(i64, UploadOutcome)> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = if n < self.fail_first {
                UploadOutcome::Transient
            } else {
                UploadOutcome::Delivered
            };
            batch.iter().map(|r| (r.id, outcome)).collect()
        }
    }

    #[tokio::test]
    async fn test_escalation_delivers_out_of_band_when_network_recovers() {
        // The network comes back exactly between the exhausting batch upload
        // and the escalation attempt, so the record lands without a
        // notification.
        let ctx = TelemetryContext::open_memory(
            config(),
            FlakyUploader {
                calls: AtomicUsize::new(0),
                fail_first: 3,
            },
            SwitchableMonitor(AtomicBool::new(true)),
            StaticToken(Some("tok".into())),
            RecordingNotifier::default(),
        )
        .unwrap();
        let sched = RetryScheduler::new(Arc::new(ctx));
        sched.context.enqueue(location()).await.unwrap();

        for _ in 0..2 {
            sched.run_cycle().await.unwrap();
        }
        let report = sched.run_cycle().await.unwrap();
        assert_eq!(report.exhausted, 1);

        let stats = sched.context.stats().await.unwrap();
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.failed, 0);
        assert!(sched.context.notifier.messages.lock().unwrap().is_empty());
    }

    struct GatedUploader {
        calls: AtomicUsize,
        reached: tokio::sync::Semaphore,
        released: tokio::sync::Semaphore,
    }

    impl GatedUploader {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reached: tokio::sync::Semaphore::new(0),
                released: tokio::sync::Semaphore::new(0),
            }
        }
    }

    impl Uploader for GatedUploader {
        async fn upload(
            &self,
            batch: &[Record],
            _token: Option<&str>,
        ) -> Vec<(i64, UploadOutcome)> {
            // The fourth call is the out-of-band escalation attempt; park it
            // until the test lets it through.
            if self.calls.fetch_add(1, Ordering::SeqCst) == 3 {
                self.reached.add_permits(1);
                self.released.acquire().await.unwrap().forget();
            }
            batch
                .iter()
                .map(|r| (r.id, UploadOutcome::Transient))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_ledger_stays_available_during_escalation_upload() {
        let sched = {
            let ctx = TelemetryContext::open_memory(
                config(),
                GatedUploader::new(),
                SwitchableMonitor(AtomicBool::new(true)),
                StaticToken(Some("tok".into())),
                RecordingNotifier::default(),
            )
            .unwrap();
            RetryScheduler::new(Arc::new(ctx))
        };
        sched.context.enqueue(location()).await.unwrap();
        for _ in 0..2 {
            sched.run_cycle().await.unwrap();
        }

        let runner = {
            let ctx = sched.context.clone();
            tokio::spawn(async move { RetryScheduler::new(ctx).run_cycle().await })
        };
        sched.context.uploader.reached.acquire().await.unwrap().forget();

        // With the escalation upload parked mid-flight, producers must not
        // queue behind it.
        let guard = tokio::time::timeout(
            Duration::from_secs(1),
            sched.context.ledger.lock(),
        )
        .await
        .expect("ledger held across the escalation upload");
        drop(guard);

        sched.context.uploader.released.add_permits(1);
        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.exhausted, 1);
    }

    #[tokio::test]
    async fn test_missing_credential_defers_without_penalty() {
        let sched = scheduler(FixedUploader::new(UploadOutcome::Delivered), true, None);
        let id = sched.context.enqueue(location()).await.unwrap();

        let report = sched.run_cycle().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.delivered, 0);

        let ledger = sched.context.ledger.lock().await;
        let record = ledger.get_record(id).unwrap().unwrap();
        assert_eq!(record.sync_status, crate::model::SyncStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_cycle_runs_housekeeping_after_delivery() {
        // Tiny capacity so the cycle's eviction pass fires on the freshly
        // synced records.
        let mut cfg = config();
        cfg.max_records = 4;
        cfg.cleanup_threshold = 0.5;
        let ctx = TelemetryContext::open_memory(
            cfg,
            FixedUploader::new(UploadOutcome::Delivered),
            SwitchableMonitor(AtomicBool::new(true)),
            StaticToken(Some("tok".into())),
            RecordingNotifier::default(),
        )
        .unwrap();
        let sched = RetryScheduler::new(Arc::new(ctx));

        {
            let mut ledger = sched.context.ledger.lock().await;
            for _ in 0..4 {
                ledger.append(&location(), 1).unwrap();
            }
        }

        let report = sched.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 4);
        assert!(report.evicted > 0);
        assert!(sched.context.stats().await.unwrap().total < 4);
    }

    #[tokio::test]
    async fn test_run_reverts_in_flight_on_shutdown() {
        let sched = scheduler(FixedUploader::new(UploadOutcome::Delivered), true, Some("tok"));
        {
            let mut ledger = sched.context.ledger.lock().await;
            let id = ledger.append(&location(), 1).unwrap();
            ledger.mark_syncing(&[id]).unwrap();
        }

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        // The shutdown signal is already pending, so run() exits before the
        // first tick fires a cycle... or after one immediate tick; either
        // way no record may be left SYNCING.
        sched.run(rx).await.unwrap();

        let stats = sched.context.stats().await.unwrap();
        assert_eq!(stats.syncing, 0);
    }
}
