//! Failed command implementation: lists entries needing manual resolution.

use super::{open_store, print_json, CliResult, OutputFormat};
use fieldsync_core::{PendingAction, PendingUpload};
use serde::Serialize;
use std::path::Path;

/// Failed queue entries.
#[derive(Debug, Serialize)]
pub struct FailedEntries {
    /// Failed actions, oldest first.
    pub actions: Vec<PendingAction>,
    /// Failed uploads, oldest first.
    pub uploads: Vec<PendingUpload>,
}

/// Runs the failed command.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let store = open_store(path)?;
    let entries = FailedEntries {
        actions: store.actions().failed(),
        uploads: store.uploads().failed(),
    };

    if format == OutputFormat::Json {
        return print_json(&entries);
    }

    if entries.actions.is_empty() && entries.uploads.is_empty() {
        println!("No failed entries.");
        return Ok(());
    }
    for action in &entries.actions {
        println!(
            "action {:>6}  {:<18} {:<40} retries={}  {}",
            action.id,
            action.mutation.name(),
            action.local_id,
            action.retry_count(),
            action.last_error().unwrap_or("-")
        );
    }
    for upload in &entries.uploads {
        println!(
            "upload {:>6}  {:<18} {:<40} retries={}  {}",
            upload.id,
            upload.kind(),
            upload.upload.local_path.display(),
            upload.state.retry_count,
            upload.state.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
