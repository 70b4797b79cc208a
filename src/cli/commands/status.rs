//! Status command implementation.

use crate::cli::{Cli, open_context};
use crate::error::Result;
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct StatusOutput {
    db_path: String,
    total: usize,
    pending: usize,
    syncing: usize,
    synced: usize,
    failed: usize,
    recovery: Option<RecoveryInfo>,
    events: Vec<EventInfo>,
}

#[derive(Serialize)]
struct RecoveryInfo {
    restored_from_snapshot: bool,
    store_reset: bool,
    reverted_syncing: usize,
    requeued_failed: usize,
}

#[derive(Serialize)]
struct EventInfo {
    event_type: &'static str,
    record_id: Option<i64>,
    detail: Option<String>,
    created_at: i64,
}

/// Show ledger occupancy and the recent audit trail.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened or queried.
pub async fn execute(cli: &Cli) -> Result<()> {
    let (ctx, report) = open_context(cli)?;
    let stats = ctx.stats().await?;
    let events = ctx.recent_events(10).await?;

    if cli.json {
        let output = StatusOutput {
            db_path: ctx.config().db_path.display().to_string(),
            total: stats.total,
            pending: stats.pending,
            syncing: stats.syncing,
            synced: stats.synced,
            failed: stats.failed,
            recovery: report.corruption_detected.then_some(RecoveryInfo {
                restored_from_snapshot: report.restored_from_snapshot,
                store_reset: report.store_reset,
                reverted_syncing: report.reverted_syncing,
                requeued_failed: report.requeued_failed,
            }),
            events: events
                .iter()
                .map(|e| EventInfo {
                    event_type: e.event_type.as_str(),
                    record_id: e.record_id,
                    detail: e.detail.clone(),
                    created_at: e.created_at,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("TraceTrip Telemetry Status");
    println!("==========================");
    println!();
    println!("Ledger: {}", ctx.config().db_path.display());
    println!();
    println!("Records: {}", stats.total);
    println!("  {} {}", "Pending:".yellow(), stats.pending);
    println!("  {} {}", "Syncing:".cyan(), stats.syncing);
    println!("  {} {}", "Synced: ".green(), stats.synced);
    println!("  {} {}", "Failed: ".red(), stats.failed);

    if report.reverted_syncing > 0 || report.requeued_failed > 0 {
        println!();
        println!(
            "Recovered on open: {} in-flight reverted, {} failed requeued",
            report.reverted_syncing, report.requeued_failed
        );
    }

    if !events.is_empty() {
        println!();
        println!("Recent events:");
        for event in &events {
            let record = event
                .record_id
                .map_or(String::new(), |id| format!(" record {id}"));
            let detail = event
                .detail
                .as_deref()
                .map_or(String::new(), |d| format!(" ({d})"));
            println!("  {}{record}{detail}", event.event_type.as_str());
        }
    }

    Ok(())
}
