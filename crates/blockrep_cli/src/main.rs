//! blockrep CLI
//!
//! Command-line tools for local replica directories.
//!
//! # Commands
//!
//! - `create` - Initialise a replica directory
//! - `inspect` - Display replica metadata and usage
//! - `snapshot` - Append a snapshot to the chain
//! - `checkpoint` - Mark a snapshot as the checkpoint
//! - `verify` - Check metadata, captures and liveness

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// blockrep replica administration tools.
#[derive(Parser)]
#[command(name = "blockrep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise a replica directory
    Create {
        /// Volume size in bytes
        #[arg(short, long, default_value_t = 64 * 1024 * 1024)]
        size: u64,

        /// Sector size in bytes
        #[arg(long, default_value_t = 4096)]
        sector_size: u64,

        /// Volume the replica belongs to
        #[arg(long)]
        volume: Option<String>,
    },

    /// Display replica metadata and usage
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Append a snapshot to the chain
    Snapshot {
        /// Snapshot name
        name: String,

        /// Record the snapshot as system-created
        #[arg(long)]
        system: bool,

        /// Creation timestamp (defaults to seconds since the Unix epoch)
        #[arg(long)]
        created: Option<String>,
    },

    /// Mark a snapshot as the checkpoint
    Checkpoint {
        /// Snapshot name
        name: String,
    },

    /// Check metadata, captures and liveness
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Create {
            size,
            sector_size,
            volume,
        } => {
            let path = cli.path.ok_or("Replica path required for create")?;
            commands::create::run(&path, size, sector_size, volume)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Replica path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Snapshot {
            name,
            system,
            created,
        } => {
            let path = cli.path.ok_or("Replica path required for snapshot")?;
            commands::snapshot::run(&path, &name, !system, created)?;
        }
        Commands::Checkpoint { name } => {
            let path = cli.path.ok_or("Replica path required for checkpoint")?;
            commands::checkpoint::run(&path, &name)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Replica path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("blockrep CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "metadata format v{}",
                blockrep_backend::META_VERSION
            );
        }
    }

    Ok(())
}
