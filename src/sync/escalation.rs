//! Error escalation: the capture fast path and the exhaustion hand-off.
//!
//! Errors captured at exception sites try one immediate delivery before
//! touching the ledger, matching the rule that telemetry about failures is
//! the data most worth delivering promptly. Records that burn through their
//! whole retry budget are handed here too: they get one last direct
//! delivery attempt, and when that fails as well the user gets a
//! notification and the audit trail gets an event, but the record itself
//! stays `FAILED` and is requeued with a fresh budget on the next open.

use crate::context::TelemetryContext;
use crate::error::Result;
use crate::model::{ErrorEvent, Record, RecordPayload, SyncStatus};
use crate::storage::events::{self, EventType};
use crate::sync::{ConnectivityMonitor, CredentialSource, Notifier, UploadOutcome, Uploader};

/// Where a captured error ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Delivered immediately; nothing was buffered.
    Delivered,
    /// Buffered in the ledger under the returned record id.
    Buffered(i64),
}

impl<U, M, C, N> TelemetryContext<U, M, C, N>
where
    U: Uploader,
    M: ConnectivityMonitor,
    C: CredentialSource,
    N: Notifier,
{
    /// Capture an error at an exception site.
    ///
    /// Tries one immediate delivery when online with a credential; any
    /// failure falls back to buffering, where the normal retry machinery
    /// takes over. The error is never lost between the two paths, and
    /// whenever it cannot be delivered right away the user is told it was
    /// kept locally.
    ///
    /// # Errors
    ///
    /// Returns an error only if the fallback append itself fails.
    pub async fn capture_error(&self, event: ErrorEvent) -> Result<CaptureOutcome> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let token = self.credentials.token();

        if self.monitor.is_online() && token.is_some() {
            let probe = Record {
                id: 0,
                payload: RecordPayload::ErrorEvent(event.clone()),
                created_at,
                sync_status: SyncStatus::Pending,
                retry_count: 0,
                last_attempt_at: None,
            };
            let outcomes = self
                .uploader
                .upload(std::slice::from_ref(&probe), token.as_deref())
                .await;
            if outcomes
                .iter()
                .all(|(_, o)| *o == UploadOutcome::Delivered)
            {
                tracing::debug!(error = %event.error, "error delivered on capture");
                return Ok(CaptureOutcome::Delivered);
            }
        }

        let id = self.enqueue(RecordPayload::ErrorEvent(event)).await?;
        tracing::debug!(id, "error buffered for retry");
        self.notifier.notify(
            "Error report saved locally",
            "The report could not be sent right now. It is stored on the \
             device and will be retried automatically.",
        );
        Ok(CaptureOutcome::Buffered(id))
    }

    /// Hand a retry-exhausted record to the escalation path.
    ///
    /// One direct delivery attempt first; only when that fails too does the
    /// record surface to the user. The upload runs without the ledger lock,
    /// like batch uploads; the lock is taken only to apply the result.
    pub(crate) async fn escalate_exhausted(&self, record: &Record) -> Result<bool> {
        tracing::warn!(
            id = record.id,
            attempts = record.retry_count,
            kind = record.payload.kind(),
            "retry budget exhausted"
        );

        let token = self.credentials.token();
        if self.monitor.is_online() && token.is_some() {
            let outcomes = self
                .uploader
                .upload(std::slice::from_ref(record), token.as_deref())
                .await;
            if outcomes
                .iter()
                .all(|(_, o)| *o == UploadOutcome::Delivered)
            {
                let mut ledger = self.ledger.lock().await;
                if ledger.mark_escalated_delivered(record.id)? {
                    tracing::info!(id = record.id, "exhausted record delivered out of band");
                    return Ok(true);
                }
            }
        }

        self.notifier.notify(
            "Telemetry delivery failed",
            &format!(
                "A {} record could not be delivered after {} attempts. \
                 It is kept locally and will be retried on the next launch.",
                record.payload.kind(),
                record.retry_count
            ),
        );
        let ledger = self.ledger.lock().await;
        events::insert_event(
            ledger.conn(),
            EventType::EscalationNotified,
            Some(record.id),
            None,
        )?;
        Ok(false)
    }
}
