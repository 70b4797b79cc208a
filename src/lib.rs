//! TraceTrip telemetry - offline-first buffering and sync for tracking data
//!
//! This crate buffers GPS fixes and error events in a WAL-backed SQLite
//! ledger and delivers them to the tracking API with bounded retries. The
//! device is assumed to be offline, killed, or out of disk at any moment;
//! a record handed to [`context::TelemetryContext::enqueue`] survives all
//! of that until it is delivered or deliberately evicted.
//!
//! # Architecture
//!
//! - [`config`] - Tuning knobs ([`config::TelemetryConfig`])
//! - [`model`] - Record types (location fixes, error events, sync status)
//! - [`storage`] - SQLite ledger, eviction, snapshots, audit events
//! - [`sync`] - Uploader, retry scheduler, escalation path
//! - [`context`] - The shared context tying the pieces together
//! - [`cli`] - The `triptel` harness binary
//! - [`error`] - Error types and the retry taxonomy

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
