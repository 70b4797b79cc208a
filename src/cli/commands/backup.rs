//! Backup command implementation.

use crate::cli::{Cli, open_context};
use crate::error::Result;
use serde_json::json;

/// Snapshot the ledger now, regardless of cadence.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened or the snapshot fails.
pub async fn execute(cli: &Cli) -> Result<()> {
    let (ctx, _) = open_context(cli)?;
    ctx.snapshot_now().await?;

    let path = ctx.config().snapshot_path();
    if cli.json {
        println!("{}", json!({ "snapshot": path.display().to_string() }));
    } else if !cli.quiet {
        println!("Snapshot written to {}", path.display());
    }
    Ok(())
}
