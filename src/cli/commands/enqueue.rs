//! Enqueue command implementations.

use crate::cli::{Cli, ErrorArgs, LocationArgs, open_context};
use crate::error::Result;
use crate::model::{ErrorEvent, LocationFix};
use crate::sync::CaptureOutcome;
use serde_json::json;

/// Buffer a GPS fix in the ledger.
///
/// # Errors
///
/// Returns an error if the append fails.
pub async fn execute_location(args: &LocationArgs, cli: &Cli) -> Result<()> {
    let (ctx, _) = open_context(cli)?;
    let id = ctx
        .enqueue_location(LocationFix {
            latitude: args.latitude,
            longitude: args.longitude,
            accuracy: args.accuracy,
            altitude: args.altitude,
            speed: args.speed,
            heading: args.heading,
        })
        .await?;

    if cli.json {
        println!("{}", json!({ "id": id, "status": "PENDING" }));
    } else if !cli.quiet {
        println!("Buffered location record {id}");
    }
    Ok(())
}

/// Capture an error event.
///
/// By default runs the escalation fast path (one immediate delivery
/// attempt before buffering); `--buffer-only` skips straight to the
/// ledger.
///
/// # Errors
///
/// Returns an error if the append fails.
pub async fn execute_error(args: &ErrorArgs, cli: &Cli) -> Result<()> {
    let (ctx, _) = open_context(cli)?;

    let mut event = ErrorEvent {
        error: args.error.clone(),
        message: args.message.clone(),
        stack: args.stack.clone(),
        context: None,
    };
    if let Some(context_type) = &args.context {
        event.context = Some(json!({ "type": context_type }));
    }

    let outcome = if args.buffer_only {
        CaptureOutcome::Buffered(ctx.enqueue_error(event).await?)
    } else {
        ctx.capture_error(event).await?
    };

    match outcome {
        CaptureOutcome::Delivered => {
            if cli.json {
                println!("{}", json!({ "delivered": true }));
            } else if !cli.quiet {
                println!("Error delivered immediately");
            }
        }
        CaptureOutcome::Buffered(id) => {
            if cli.json {
                println!("{}", json!({ "delivered": false, "id": id }));
            } else if !cli.quiet {
                println!("Buffered error record {id}");
            }
        }
    }
    Ok(())
}
