//! Batch delivery over HTTPS.
//!
//! The uploader turns buffered records into wire requests and reports a
//! per-record outcome. It never retries internally; spacing and budgets
//! belong to the scheduler and the ledger.

use crate::error::Result;
use crate::model::{ErrorEvent, LocationFix, Record, RecordPayload};
use reqwest::StatusCode;
use serde_json::json;
use std::future::Future;
use std::time::Duration;

pub(crate) const LOCATION_PATH: &str = "rastreamento/location";
pub(crate) const ERROR_LOG_PATH: &str = "rastreamento/error-log";

/// Result of one record's delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Accepted by the server; the record may be marked `SYNCED`.
    Delivered,
    /// Failed in a way a later attempt can fix (network down, 5xx,
    /// timeout). Counts against the retry budget.
    Transient,
    /// Rejected or blocked for credential reasons. Does not count against
    /// the retry budget; the batch waits for a usable token.
    Unauthorized,
}

/// Delivers record batches, one outcome per record.
pub trait Uploader: Send + Sync {
    /// Attempt delivery of `batch`.
    ///
    /// With no token the whole batch must come back [`UploadOutcome::Unauthorized`]
    /// without touching the network.
    fn upload(
        &self,
        batch: &[Record],
        token: Option<&str>,
    ) -> impl Future<Output = Vec<(i64, UploadOutcome)>> + Send;
}

/// reqwest-backed uploader posting to the tracking API.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploader {
    /// Build an uploader for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post_one(&self, record: &Record, token: &str) -> UploadOutcome {
        let (path, body) = wire_parts(record);
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);

        match self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => UploadOutcome::Delivered,
            Ok(resp)
                if matches!(
                    resp.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                tracing::debug!(id = record.id, status = %resp.status(), "upload unauthorized");
                UploadOutcome::Unauthorized
            }
            Ok(resp) => {
                tracing::debug!(id = record.id, status = %resp.status(), "upload rejected");
                UploadOutcome::Transient
            }
            Err(e) => {
                tracing::debug!(id = record.id, error = %e, "upload failed");
                UploadOutcome::Transient
            }
        }
    }
}

impl Uploader for HttpUploader {
    async fn upload(&self, batch: &[Record], token: Option<&str>) -> Vec<(i64, UploadOutcome)> {
        let Some(token) = token else {
            tracing::debug!(batch = batch.len(), "no credential, batch deferred");
            return batch
                .iter()
                .map(|r| (r.id, UploadOutcome::Unauthorized))
                .collect();
        };

        // Sequential on purpose: batches are small and ordered delivery
        // keeps server-side traces readable.
        let mut outcomes = Vec::with_capacity(batch.len());
        for record in batch {
            outcomes.push((record.id, self.post_one(record, token).await));
        }
        outcomes
    }
}

/// Endpoint path and request body for one record.
pub(crate) fn wire_parts(record: &Record) -> (&'static str, serde_json::Value) {
    match &record.payload {
        RecordPayload::Location(fix) => (LOCATION_PATH, location_body(fix, record.created_at)),
        RecordPayload::ErrorEvent(event) => {
            (ERROR_LOG_PATH, error_log_body(event, record.created_at))
        }
    }
}

fn location_body(fix: &LocationFix, created_at: i64) -> serde_json::Value {
    strip_nulls(json!({
        "latitude": fix.latitude,
        "longitude": fix.longitude,
        "accuracy": fix.accuracy,
        "altitude": fix.altitude,
        "speed": fix.speed,
        "heading": fix.heading,
        "timestamp": rfc3339(created_at),
    }))
}

pub(crate) fn error_log_body(event: &ErrorEvent, created_at: i64) -> serde_json::Value {
    strip_nulls(json!({
        "error": event.error,
        "message": event.message,
        "stack": event.stack,
        "timestamp": rfc3339(created_at),
        "context": event.context,
    }))
}

/// The API omits absent optional fields instead of sending nulls.
fn strip_nulls(mut value: serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    value
}

fn rfc3339(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncStatus;
    use std::io::{Read as _, Write as _};

    fn record(payload: RecordPayload) -> Record {
        Record {
            id: 7,
            payload,
            created_at: 1_700_000_000_000,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
        }
    }

    #[test]
    fn test_location_wire_shape() {
        let rec = record(RecordPayload::Location(LocationFix {
            latitude: -23.55,
            longitude: -46.63,
            accuracy: Some(12.5),
            altitude: None,
            speed: None,
            heading: None,
        }));

        let (path, body) = wire_parts(&rec);
        assert_eq!(path, LOCATION_PATH);
        assert_eq!(body["latitude"], -23.55);
        assert_eq!(body["accuracy"], 12.5);
        assert!(body.get("altitude").is_none());
        assert_eq!(body["timestamp"], "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_error_wire_shape() {
        let rec = record(RecordPayload::ErrorEvent(ErrorEvent::with_context_type(
            "LocationTimeout",
            "no fix within 30s",
            "location_tracking",
        )));

        let (path, body) = wire_parts(&rec);
        assert_eq!(path, ERROR_LOG_PATH);
        assert_eq!(body["error"], "LocationTimeout");
        assert_eq!(body["message"], "no fix within 30s");
        assert_eq!(body["context"]["type"], "location_tracking");
        assert!(body.get("stack").is_none());
    }

    #[tokio::test]
    async fn test_missing_token_defers_whole_batch() {
        let uploader = HttpUploader::new("https://api.test", Duration::from_secs(1)).unwrap();
        let batch = vec![
            record(RecordPayload::Location(LocationFix {
                latitude: 0.0,
                longitude: 0.0,
                accuracy: None,
                altitude: None,
                speed: None,
                heading: None,
            })),
        ];

        let outcomes = uploader.upload(&batch, None).await;
        assert_eq!(outcomes, vec![(7, UploadOutcome::Unauthorized)]);
    }

    /// One-shot server answering each connection with the next status.
    fn serve_statuses(statuses: &'static [u16]) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for status in statuses {
                let (mut stream, _) = listener.accept().unwrap();
                read_request(&mut stream);
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status} Status\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
                );
            }
        });
        format!("http://{addr}")
    }

    fn read_request(stream: &mut std::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let body_len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + body_len {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_status_mapping_over_local_listener() {
        let base = serve_statuses(&[201, 401, 403, 500]);
        let uploader = HttpUploader::new(base, Duration::from_secs(5)).unwrap();

        let batch: Vec<Record> = (1..=4)
            .map(|id| Record {
                id,
                payload: RecordPayload::Location(LocationFix {
                    latitude: 0.0,
                    longitude: 0.0,
                    accuracy: None,
                    altitude: None,
                    speed: None,
                    heading: None,
                }),
                created_at: 1_700_000_000_000,
                sync_status: SyncStatus::Pending,
                retry_count: 0,
                last_attempt_at: None,
            })
            .collect();

        let outcomes = uploader.upload(&batch, Some("tok")).await;
        assert_eq!(
            outcomes,
            vec![
                (1, UploadOutcome::Delivered),
                (2, UploadOutcome::Unauthorized),
                (3, UploadOutcome::Unauthorized),
                (4, UploadOutcome::Transient),
            ]
        );
    }
}
