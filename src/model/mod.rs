//! Data types for the telemetry ledger.

mod record;

pub use record::{ErrorEvent, LocationFix, Record, RecordPayload, SyncStatus};
