//! Volume Engine CLI - Command line interface for volume operations.
//!
//! Reads volume records as JSON files and drives them through the core
//! engine: one-off mount/unmount/health calls, a single reconciliation pass,
//! or a periodic reconciliation loop.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Volume Engine CLI tool.
#[derive(Parser)]
#[command(name = "volume-engine-cli")]
#[command(about = "Mount, unmount and health-check storage volumes", long_about = None)]
struct Cli {
    /// Engine config file (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the volume described by a JSON record.
    Mount {
        #[arg(long)]
        volume: PathBuf,
    },
    /// Unmount the volume described by a JSON record.
    Unmount {
        #[arg(long)]
        volume: PathBuf,
    },
    /// Report the observed status of a volume.
    Health {
        #[arg(long)]
        volume: PathBuf,
    },
    /// Run one reconciliation pass over a JSON array of records.
    Reconcile {
        #[arg(long)]
        volumes: PathBuf,
    },
    /// Reconcile auto-remount volumes periodically until interrupted.
    ///
    /// The volumes file is re-read on every pass, so edits take effect
    /// without a restart.
    Watch {
        #[arg(long)]
        volumes: PathBuf,
        /// Seconds between passes.
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("volume_engine_core=debug,volume_engine_cli=debug,warn")
        } else {
            EnvFilter::new("volume_engine_core=info,volume_engine_cli=info,warn")
        }
    });

    // stdout carries JSON results; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = match cli.command {
        Commands::Mount { volume } => commands::mount(cli.config.as_deref(), &volume).await,
        Commands::Unmount { volume } => commands::unmount(cli.config.as_deref(), &volume).await,
        Commands::Health { volume } => commands::health(cli.config.as_deref(), &volume).await,
        Commands::Reconcile { volumes } => {
            commands::reconcile(cli.config.as_deref(), &volumes).await
        }
        Commands::Watch { volumes, interval } => {
            commands::watch(cli.config.as_deref(), &volumes, interval).await
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
