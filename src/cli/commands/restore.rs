//! Restore command implementation.

use crate::cli::{Cli, build_config, open_context_with};
use crate::error::{Error, Result};
use crate::storage::{BackupManager, backup};
use serde_json::json;

/// Restore the ledger from its snapshot.
///
/// Refuses to overwrite an existing store unless `--force` is given; the
/// automatic restore path only ever runs against a corrupt store.
///
/// # Errors
///
/// Returns an error if no valid snapshot exists or the copy fails.
pub async fn execute(force: bool, cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;

    BackupManager::new(&config).verify()?;

    if config.db_path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists; pass --force to overwrite it with the snapshot",
            config.db_path.display()
        )));
    }

    backup::restore_snapshot_files(&config)?;

    // Reopen to run recovery and confirm the restored store is usable.
    let (ctx, _) = open_context_with(cli, config)?;
    let stats = ctx.stats().await?;

    if cli.json {
        println!(
            "{}",
            json!({ "restored": true, "total": stats.total, "pending": stats.pending })
        );
    } else if !cli.quiet {
        println!(
            "Restored {} records ({} pending)",
            stats.total, stats.pending
        );
    }
    Ok(())
}
