//! Run command implementation: the scheduler loop.

use crate::cli::{Cli, build_config, effective_interval, open_context_with};
use crate::error::Result;
use crate::sync::RetryScheduler;
use tokio::sync::watch;

/// Run sync cycles on the configured interval until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened or the shutdown release
/// fails.
pub async fn execute(interval_secs: Option<u64>, cli: &Cli) -> Result<()> {
    let mut config = build_config(cli)?;
    config.sync_interval = effective_interval(&config, interval_secs);

    let (ctx, _) = open_context_with(cli, config)?;
    let scheduler = RetryScheduler::new(ctx.clone());

    if !cli.quiet {
        println!(
            "Syncing every {}s against {} (Ctrl-C to stop)",
            ctx.config().sync_interval.as_secs(),
            ctx.config().api_base_url
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_tx.send(true).ok();
        }
    });

    scheduler.run(shutdown_rx).await?;

    if !cli.quiet {
        let stats = ctx.stats().await?;
        println!(
            "Stopped. {} pending, {} synced, {} failed",
            stats.pending, stats.synced, stats.failed
        );
    }
    Ok(())
}
