//! FieldSync CLI
//!
//! Maintenance and debugging tools for FieldSync local stores.
//!
//! # Commands
//!
//! - `inspect` - Display queue counts, entities and cache usage
//! - `failed` - List entries needing manual resolution
//! - `resolve` - Discard or retry a failed entry
//! - `evict` - Run cache eviction
//! - `compact` - Rewrite the journal as a snapshot

mod commands;

use clap::{Parser, Subcommand};
use commands::resolve::{Decision, Target};
use commands::{CliError, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FieldSync command-line store tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
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
    /// Display queue counts, entities and cache usage
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List failed actions and uploads
    Failed {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Discard or retry a failed entry
    Resolve {
        /// Queue holding the entry
        #[arg(value_enum)]
        target: Target,

        /// Entry id
        id: u64,

        /// What to do with it
        #[arg(value_enum)]
        decision: Decision,
    },

    /// Evict expired and oversize cache entries
    Evict {
        /// Directory holding cached files
        #[arg(short, long)]
        cache_dir: PathBuf,

        /// Maximum entry age in hours (default 168)
        #[arg(long)]
        max_age_hours: Option<u64>,

        /// Maximum total cache size in MiB (default 500)
        #[arg(long)]
        max_size_mb: Option<u64>,
    },

    /// Rewrite the journal as a single snapshot
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("FieldSync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!(
            "Journal format v{}",
            fieldsync_core::journal::JOURNAL_VERSION
        );
        return Ok(());
    }

    let path = cli
        .path
        .ok_or_else(|| CliError::Usage("store path required (--path)".into()))?;

    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, format),
        Commands::Failed { format } => commands::failed::run(&path, format),
        Commands::Resolve {
            target,
            id,
            decision,
        } => commands::resolve::run(&path, target, id, decision),
        Commands::Evict {
            cache_dir,
            max_age_hours,
            max_size_mb,
        } => commands::evict::run(&path, cache_dir, max_age_hours, max_size_mb),
        Commands::Compact { dry_run } => commands::compact::run(&path, dry_run),
        Commands::Version => Ok(()),
    }
}
