//! Capacity-bounded eviction over the ledger.
//!
//! Runs after every successful append and after every sync cycle. When
//! occupancy (`count / max_records`) reaches the cleanup threshold, records
//! are pruned until occupancy drops strictly below it, in tier order:
//! `SYNCED` oldest-first, then `FAILED`, then `PENDING`. Losing unsent data
//! is the last resort and never silent: every non-`SYNCED` eviction leaves
//! a diagnostic event in the audit trail and a warning in the log.

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::model::SyncStatus;
use crate::storage::ledger::Ledger;

/// Eviction policy parameters, taken from the shared configuration.
#[derive(Debug, Clone, Copy)]
pub struct EvictionManager {
    enabled: bool,
    max_records: usize,
    cleanup_threshold: f64,
}

/// What one enforcement pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub synced: usize,
    pub failed: usize,
    pub pending: usize,
}

impl EvictionReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.synced + self.failed + self.pending
    }

    /// True when not-yet-delivered records had to be dropped.
    #[must_use]
    pub const fn lost_unsent(&self) -> bool {
        self.failed + self.pending > 0
    }
}

impl EvictionManager {
    #[must_use]
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            enabled: config.cleanup_enabled,
            max_records: config.max_records,
            cleanup_threshold: config.cleanup_threshold,
        }
    }

    /// Record count at which pruning starts.
    #[must_use]
    fn trigger_count(&self) -> usize {
        // occupancy >= threshold triggers; ceil keeps the comparison exact
        // for fractional thresholds without floating-point edge cases.
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let t = (self.cleanup_threshold * self.max_records as f64).ceil() as usize;
        t.max(1)
    }

    /// Enforce the capacity bound, pruning tiers in order until occupancy
    /// is strictly below the threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger operation fails; partial progress made
    /// before the failure remains committed (each tier delete is its own
    /// transaction).
    pub fn enforce(&self, ledger: &mut Ledger) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        if !self.enabled {
            return Ok(report);
        }

        let count = ledger.count()?;
        let trigger = self.trigger_count();
        if count < trigger {
            return Ok(report);
        }

        // Remove exactly enough to land one below the trigger point.
        let mut excess = count - trigger + 1;
        tracing::debug!(count, max = self.max_records, excess, "eviction triggered");

        for status in [SyncStatus::Synced, SyncStatus::Failed, SyncStatus::Pending] {
            if excess == 0 {
                break;
            }
            let available = ledger.count_status(status)?;
            let take = excess.min(available);
            if take == 0 {
                continue;
            }

            let deleted = ledger.delete_oldest(take, status)?.len();
            excess -= deleted;
            match status {
                SyncStatus::Synced => report.synced += deleted,
                SyncStatus::Failed => report.failed += deleted,
                SyncStatus::Pending => report.pending += deleted,
                SyncStatus::Syncing => {}
            }
        }

        if report.lost_unsent() {
            tracing::warn!(
                failed = report.failed,
                pending = report.pending,
                "evicted unsent records to stay under capacity"
            );
        } else if report.total() > 0 {
            tracing::debug!(synced = report.synced, "evicted synced records");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LocationFix, RecordPayload};
    use crate::storage::events::{self, EventType};
    use std::path::PathBuf;

    fn config(max_records: usize, threshold: f64) -> TelemetryConfig {
        let mut cfg = TelemetryConfig::recommended(
            PathBuf::from("unused"),
            "https://api.test".into(),
        );
        cfg.max_records = max_records;
        cfg.cleanup_threshold = threshold;
        cfg
    }

    fn payload() -> RecordPayload {
        RecordPayload::Location(LocationFix {
            latitude: 0.0,
            longitude: 0.0,
            accuracy: None,
            altitude: None,
            speed: None,
            heading: None,
        })
    }

    fn fill(ledger: &mut Ledger, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| ledger.append(&payload(), i as i64).unwrap())
            .collect()
    }

    #[test]
    fn test_below_threshold_is_untouched() {
        let cfg = config(100, 0.8);
        let mut ledger = Ledger::open_memory(&cfg).unwrap();
        fill(&mut ledger, 79);

        let report = EvictionManager::new(&cfg).enforce(&mut ledger).unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(ledger.count().unwrap(), 79);
    }

    #[test]
    fn test_synced_evicted_before_pending() {
        // spec scenario: maxRecords=100, threshold=0.8, 81 records with
        // 50 SYNCED → prune to ≤80 touching only SYNCED.
        let cfg = config(100, 0.8);
        let mut ledger = Ledger::open_memory(&cfg).unwrap();
        let ids = fill(&mut ledger, 81);

        let acquired = ledger.mark_syncing(&ids[..50]).unwrap();
        ledger.mark_synced(&acquired).unwrap();

        let report = EvictionManager::new(&cfg).enforce(&mut ledger).unwrap();
        assert_eq!(report.pending, 0);
        assert_eq!(report.failed, 0);
        assert!(report.synced >= 1);
        assert!(ledger.count().unwrap() <= 80);
        // Pending tier untouched
        assert_eq!(ledger.stats().unwrap().pending, 31);
    }

    #[test]
    fn test_removes_no_more_than_needed() {
        let cfg = config(100, 0.8);
        let mut ledger = Ledger::open_memory(&cfg).unwrap();
        let ids = fill(&mut ledger, 85);
        let acquired = ledger.mark_syncing(&ids[..60]).unwrap();
        ledger.mark_synced(&acquired).unwrap();

        EvictionManager::new(&cfg).enforce(&mut ledger).unwrap();
        // Exactly below the trigger (80), not further.
        assert_eq!(ledger.count().unwrap(), 79);
    }

    #[test]
    fn test_tier_order_synced_failed_pending() {
        let cfg = config(10, 0.5);
        let mut ledger = Ledger::open_memory(&cfg).unwrap();
        let ids = fill(&mut ledger, 10);

        // 2 synced, 2 failed (retry budget is 3), 6 pending
        let synced = ledger.mark_syncing(&ids[..2]).unwrap();
        ledger.mark_synced(&synced).unwrap();
        for _ in 0..3 {
            let acq = ledger.mark_syncing(&ids[2..4]).unwrap();
            ledger.mark_failed_attempt(&acq, 0).unwrap();
        }
        assert_eq!(ledger.stats().unwrap().failed, 2);

        // trigger = 5, count = 10 → remove 6: 2 synced + 2 failed + 2 pending
        let report = EvictionManager::new(&cfg).enforce(&mut ledger).unwrap();
        assert_eq!(report, EvictionReport { synced: 2, failed: 2, pending: 2 });
        assert_eq!(ledger.count().unwrap(), 4);

        // Oldest pending went first
        assert!(ledger.get_record(ids[4]).unwrap().is_none());
        assert!(ledger.get_record(ids[6]).unwrap().is_some());
    }

    #[test]
    fn test_forced_eviction_leaves_diagnostic_events() {
        let cfg = config(4, 0.5);
        let mut ledger = Ledger::open_memory(&cfg).unwrap();
        fill(&mut ledger, 4);

        let report = EvictionManager::new(&cfg).enforce(&mut ledger).unwrap();
        assert!(report.lost_unsent());
        assert_eq!(
            events::count_events(ledger.conn(), EventType::ForcedEviction).unwrap(),
            report.pending as i64
        );
    }

    #[test]
    fn test_disabled_cleanup_never_prunes() {
        let mut cfg = config(4, 0.5);
        cfg.cleanup_enabled = false;
        let mut ledger = Ledger::open_memory(&cfg).unwrap();
        fill(&mut ledger, 10);

        let report = EvictionManager::new(&cfg).enforce(&mut ledger).unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(ledger.count().unwrap(), 10);
    }
}
