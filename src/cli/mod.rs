//! CLI definitions using clap.

use crate::config::{self, TelemetryConfig};
use crate::context::TelemetryContext;
use crate::error::{Error, Result};
use crate::storage::OpenReport;
use crate::sync::{AssumeOnline, HttpUploader, Notifier, StaticToken};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod commands;

/// TraceTrip telemetry harness - buffer, inspect, and sync tracking data
#[derive(Parser, Debug)]
#[command(name = "triptel", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Ledger path (default: platform data dir)
    #[arg(long, global = true, env = "TRIPTEL_DB")]
    pub db: Option<PathBuf>,

    /// Tracking API base URL
    #[arg(
        long,
        global = true,
        env = "TRIPTEL_API_URL",
        default_value = "https://api.tracetrip.dev"
    )]
    pub api_url: String,

    /// Bearer token for the tracking API
    #[arg(long, global = true, env = "TRIPTEL_TOKEN")]
    pub token: Option<String>,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Buffer a telemetry record in the ledger
    Enqueue {
        #[command(subcommand)]
        command: EnqueueCommands,
    },

    /// Show ledger occupancy and recent audit events
    Status,

    /// Run one sync cycle now
    Sync,

    /// Run the scheduler until interrupted
    Run {
        /// Override the sync interval in seconds
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Snapshot the ledger now
    Backup,

    /// Restore the ledger from its snapshot
    Restore {
        /// Overwrite an existing (healthy) ledger
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum EnqueueCommands {
    /// Buffer a GPS fix
    Location(LocationArgs),

    /// Capture an error event (tries immediate delivery first)
    Error(ErrorArgs),
}

#[derive(Args, Debug)]
pub struct LocationArgs {
    /// Latitude in decimal degrees
    #[arg(allow_negative_numbers = true)]
    pub latitude: f64,

    /// Longitude in decimal degrees
    #[arg(allow_negative_numbers = true)]
    pub longitude: f64,

    /// Horizontal accuracy in meters
    #[arg(short, long)]
    pub accuracy: Option<f64>,

    /// Altitude in meters
    #[arg(long)]
    pub altitude: Option<f64>,

    /// Ground speed in m/s
    #[arg(long)]
    pub speed: Option<f64>,

    /// Heading in degrees
    #[arg(long)]
    pub heading: Option<f64>,
}

#[derive(Args, Debug)]
pub struct ErrorArgs {
    /// Error name/class (e.g. LocationTimeout)
    pub error: String,

    /// Human-readable message
    pub message: String,

    /// Stack trace
    #[arg(long)]
    pub stack: Option<String>,

    /// Context type (location_tracking, api_request, database_operation)
    #[arg(short, long)]
    pub context: Option<String>,

    /// Buffer without trying immediate delivery
    #[arg(long)]
    pub buffer_only: bool,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Notifier that writes escalations to stderr.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, message: &str) {
        eprintln!("{} {message}", title.yellow().bold());
    }
}

/// The concrete context the binary runs with.
pub type CliContext = TelemetryContext<HttpUploader, AssumeOnline, StaticToken, ConsoleNotifier>;

/// Build the effective configuration from global flags.
///
/// # Errors
///
/// Returns an error when no ledger path is given and the platform data
/// directory cannot be resolved.
pub fn build_config(cli: &Cli) -> Result<TelemetryConfig> {
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => config::default_db_path().ok_or_else(|| {
            Error::Config("cannot resolve a data directory; pass --db".into())
        })?,
    };
    Ok(TelemetryConfig::recommended(db_path, cli.api_url.clone()))
}

/// Open the full subsystem with the binary's collaborators.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the ledger cannot
/// be opened.
pub fn open_context(cli: &Cli) -> Result<(Arc<CliContext>, OpenReport)> {
    open_context_with(cli, build_config(cli)?)
}

/// Open with an already-built configuration (for commands that tweak it).
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the ledger cannot
/// be opened.
pub fn open_context_with(
    cli: &Cli,
    config: TelemetryConfig,
) -> Result<(Arc<CliContext>, OpenReport)> {
    let uploader = HttpUploader::new(config.api_base_url.clone(), config.operation_timeout)?;
    let (ctx, report) = TelemetryContext::open(
        config,
        uploader,
        AssumeOnline,
        StaticToken(cli.token.clone()),
        ConsoleNotifier,
    )?;

    if report.corruption_detected && !cli.quiet {
        let what = if report.restored_from_snapshot {
            "restored from snapshot"
        } else {
            "reset empty"
        };
        eprintln!("{} ledger was corrupt; {what}", "recovered:".yellow());
    }

    Ok((Arc::new(ctx), report))
}

/// Scheduler interval override helper for `run`.
#[must_use]
pub fn effective_interval(config: &TelemetryConfig, interval_secs: Option<u64>) -> Duration {
    interval_secs.map_or(config.sync_interval, Duration::from_secs)
}
