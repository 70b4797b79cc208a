//! SQLite storage layer: schema, ledger, eviction, backup, audit events.

pub mod backup;
pub mod events;
pub mod eviction;
pub mod ledger;
pub mod schema;

pub use backup::BackupManager;
pub use eviction::{EvictionManager, EvictionReport};
pub use ledger::{Ledger, LedgerStats, OpenReport};
