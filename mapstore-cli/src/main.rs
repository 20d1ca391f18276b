//! mapstore command-line interface.
//!
//! Thin front end over the `mapstore` library: parses arguments, sets up
//! logging, builds the storage engine, and drives it to completion.

mod commands;
mod error;
mod patch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::common::EngineOptions;
use error::CliError;

#[derive(Parser, Debug)]
#[command(name = "mapstore")]
#[command(about = "Versioned regional map downloads with incremental diff updates")]
#[command(version)]
struct Cli {
    /// Root of the local map data tree (default: platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Mirror base URL; files are fetched from <server>/<version>/<file>
    #[arg(long, global = true)]
    server: Option<String>,

    /// Path to the catalog JSON document (default: <data-dir>/catalog.json)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Optional diff index JSON enabling incremental updates
    #[arg(long, global = true)]
    diffs: Option<PathBuf>,

    /// Concurrent download slots
    #[arg(long, global = true, default_value_t = 4)]
    concurrency: usize,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the region tree with local status
    List {
        /// Subtree root (default: catalog root)
        region: Option<String>,
        /// Maximum tree depth to print
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Show detailed local state of one region
    Status { region: String },
    /// Download and install regions
    Download {
        /// Regions (leaves or groups) to download
        #[arg(required = true)]
        regions: Vec<String>,
        /// Force full downloads even when diffs are offered
        #[arg(long)]
        full: bool,
    },
    /// Bring installed regions up to the catalog version
    Update {
        /// Regions to update (default: everything installed)
        regions: Vec<String>,
    },
    /// Remove regions' local files across all versions
    Delete {
        #[arg(required = true)]
        regions: Vec<String>,
    },
    /// Drop queued downloads left behind by an interrupted run
    Cancel {
        /// Regions to cancel (default: everything queued)
        regions: Vec<String>,
    },
}

fn engine_options(cli: &Cli) -> Result<EngineOptions, CliError> {
    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .ok_or_else(|| {
                CliError::Config("no platform data directory; pass --data-dir".to_string())
            })?
            .join("mapstore"),
    };
    let catalog = cli
        .catalog
        .clone()
        .unwrap_or_else(|| data_dir.join("catalog.json"));
    Ok(EngineOptions {
        data_dir,
        server: cli.server.clone(),
        catalog,
        diffs: cli.diffs.clone(),
        concurrency: cli.concurrency.max(1),
    })
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let opts = engine_options(&cli)?;
    match cli.command {
        Command::List { region, depth } => {
            commands::list::run(&opts, commands::list::ListArgs { region, depth })
        }
        Command::Status { region } => {
            commands::status::run(&opts, commands::status::StatusArgs { region })
        }
        Command::Download { regions, full } => {
            commands::download::run(&opts, commands::download::DownloadArgs { regions, full })
                .await
        }
        Command::Update { regions } => {
            commands::update::run(&opts, commands::update::UpdateArgs { regions }).await
        }
        Command::Delete { regions } => {
            commands::delete::run(&opts, commands::delete::DeleteArgs { regions })
        }
        Command::Cancel { regions } => {
            commands::cancel::run(&opts, commands::cancel::CancelArgs { regions })
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "mapstore=debug" } else { "mapstore=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
