//! Sync command implementation: one cycle, then exit.

use crate::cli::{Cli, open_context};
use crate::error::Result;
use crate::sync::RetryScheduler;
use serde_json::json;

/// Run one sync cycle.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened or a ledger operation
/// inside the cycle fails.
pub async fn execute(cli: &Cli) -> Result<()> {
    let (ctx, _) = open_context(cli)?;
    let scheduler = RetryScheduler::new(ctx.clone());

    let report = scheduler.run_cycle().await?;
    let stats = ctx.stats().await?;

    if cli.json {
        println!(
            "{}",
            json!({
                "attempted": report.attempted,
                "delivered": report.delivered,
                "deferred": report.deferred,
                "retried": report.retried,
                "exhausted": report.exhausted,
                "evicted": report.evicted,
                "snapshot_taken": report.snapshot_taken,
                "pending_after": stats.pending,
                "failed_after": stats.failed,
            })
        );
    } else if !cli.quiet {
        if report.attempted == 0 {
            println!("Nothing due for delivery");
        } else {
            println!(
                "Delivered {}/{} records ({} deferred, {} retried, {} exhausted)",
                report.delivered,
                report.attempted,
                report.deferred,
                report.retried,
                report.exhausted
            );
        }
        if report.evicted > 0 {
            println!("Evicted {} records to stay under capacity", report.evicted);
        }
        if report.snapshot_taken {
            println!("Snapshot taken");
        }
        println!("{} pending, {} failed remain", stats.pending, stats.failed);
    }
    Ok(())
}
