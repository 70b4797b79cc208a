//! `triptel` entry point.

use clap::Parser;
use std::process::ExitCode;
use telemetry::cli::{Cli, Commands, EnqueueCommands, commands};
use telemetry::error::Error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    init_tracing(cli.verbose, cli.quiet);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

async fn run(cli: &Cli) -> Result<(), Error> {
    match &cli.command {
        Commands::Enqueue { command } => match command {
            EnqueueCommands::Location(args) => commands::enqueue::execute_location(args, cli).await,
            EnqueueCommands::Error(args) => commands::enqueue::execute_error(args, cli).await,
        },
        Commands::Status => commands::status::execute(cli).await,
        Commands::Sync => commands::sync::execute(cli).await,
        Commands::Run { interval_secs } => commands::run::execute(*interval_secs, cli).await,
        Commands::Backup => commands::backup::execute(cli).await,
        Commands::Restore { force } => commands::restore::execute(*force, cli).await,
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
