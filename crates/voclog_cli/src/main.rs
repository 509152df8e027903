//! voclog CLI
//!
//! Offline tools for datafiles and WAL directories. Nothing here opens a
//! logfile manager; run them against a directory no process is using.
//!
//! # Commands
//!
//! - `inspect` - Show datafile headers, sizes, tick ranges and SHUTDOWN
//! - `check` - Scan datafiles and report damage without changing them
//! - `repair` - Fix torn tails and corrupt markers, truncating if needed
//! - `truncate` - Rewrite a datafile up to a position and seal it
//! - `dump` - Print the markers of a datafile

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// voclog datafile and WAL tools.
#[derive(Parser)]
#[command(name = "voclog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show datafile headers, sizes, tick ranges and SHUTDOWN
    Inspect {
        /// Datafile or WAL directory
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Scan datafiles and report damage without changing them
    Check {
        /// Datafile or WAL directory
        path: PathBuf,
    },

    /// Fix torn tails and corrupt markers, truncating if needed
    Repair {
        /// Datafile or WAL directory
        path: PathBuf,
    },

    /// Rewrite a datafile up to a position and seal it
    Truncate {
        /// Datafile
        path: PathBuf,

        /// Keep markers ending at or before this offset
        #[arg(short, long)]
        position: usize,
    },

    /// Print the markers of a datafile
    Dump {
        /// Datafile
        path: PathBuf,

        /// Maximum number of markers to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip markers before this offset
        #[arg(short, long, default_value = "0")]
        offset: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { path, format } => commands::inspect::run(&path, format)?,
        Commands::Check { path } => commands::check::run(&path)?,
        Commands::Repair { path } => commands::repair::run(&path)?,
        Commands::Truncate { path, position } => commands::repair::truncate(&path, position)?,
        Commands::Dump {
            path,
            limit,
            offset,
            format,
        } => commands::dump::run(&path, limit, offset, format)?,
    }

    Ok(())
}
