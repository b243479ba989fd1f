//! CLI command implementations.

pub mod compact;
pub mod evict;
pub mod failed;
pub mod inspect;
pub mod resolve;

use clap::ValueEnum;
use fieldsync_core::{CoreError, LocalStore, StoreConfig};
use fieldsync_engine::SyncError;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A required argument was missing or malformed.
    #[error("{0}")]
    Usage(String),

    /// Local store error.
    #[error(transparent)]
    Store(#[from] CoreError),

    /// Cache or sync error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// JSON output could not be produced.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing store. Never creates one.
pub fn open_store(path: &Path) -> CliResult<LocalStore> {
    let store = LocalStore::open(path, StoreConfig::new().create_if_missing(false))?;
    tracing::debug!(counts = ?store.counts(), "store opened for maintenance");
    Ok(store)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
