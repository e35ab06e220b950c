//! TapeStore CLI
//!
//! Command-line tools for TapeStore directories.
//!
//! # Commands
//!
//! - `inspect` - Display segment and stream statistics
//! - `verify` - Check every segment without repairing anything
//! - `dump` - Print frames for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TapeStore command-line tools.
#[derive(Parser)]
#[command(name = "tapestore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display segment and stream statistics
    Inspect {
        /// Show the version of every stream
        #[arg(short, long)]
        streams: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every segment without repairing anything
    Verify {
        /// Page size the store was written with
        #[arg(long, default_value_t = tapestore_core::StoreConfig::DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },

    /// Print frames for debugging
    Dump {
        /// Only frames of this stream
        #[arg(short, long)]
        stream: Option<String>,

        /// Start after this version (stream version with --stream, store
        /// version otherwise)
        #[arg(short, long, default_value = "0")]
        after: u64,

        /// Maximum number of frames to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { streams, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, streams, &format)?;
        }
        Commands::Verify { page_size } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, page_size)?;
        }
        Commands::Dump {
            stream,
            after,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, stream.as_deref(), after, limit, &format)?;
        }
        Commands::Version => {
            println!("TapeStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("TapeStore Core v{}", tapestore_core::VERSION);
        }
    }

    Ok(())
}
