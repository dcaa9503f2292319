//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific
//! modules.

mod dispatch;
mod init;
mod status;
mod stitch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trendsift")]
#[command(about = "Search-trend mining dispatcher and stitching engine")]
#[command(version)]
pub struct Cli {
    /// Path to the trends store database
    #[arg(long, short = 'd', global = true, default_value = "trends.db")]
    db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the trends store database
    Init,

    /// Consume queued requests: claim, fetch, ingest
    Dispatch {
        /// Use a single in-process transport running this fetch script,
        /// ignoring the transport config file
        #[arg(long, value_name = "SCRIPT")]
        local: Option<PathBuf>,
        /// Exit with status 0 once the queue is drained
        #[arg(long)]
        exit: bool,
        /// Transport configuration file
        #[arg(long, default_value = "transports.json")]
        transports: PathBuf,
    },

    /// Stitch collected fragments into long-range series
    Stitch {
        /// Keyword id to stitch
        #[arg(default_value = "1")]
        k_id: i64,
        /// Only stitch this location (ISO code)
        #[arg(long)]
        geo: Option<String>,
        /// Analytics database to write
        #[arg(short, long, default_value = "time_series.db")]
        output: PathBuf,
    },

    /// Show store status
    Status,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init::cmd_init(&cli.db),
        Commands::Dispatch {
            local,
            exit,
            transports,
        } => dispatch::cmd_dispatch(&cli.db, local, exit, &transports).await,
        Commands::Stitch { k_id, geo, output } => {
            stitch::cmd_stitch(&cli.db, k_id, geo.as_deref(), &output)
        }
        Commands::Status => status::cmd_status(&cli.db),
    }
}
