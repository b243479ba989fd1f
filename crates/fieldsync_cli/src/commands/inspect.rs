//! Inspect command implementation.

use super::{format_size, open_store, print_json, CliResult, OutputFormat};
use fieldsync_core::journal::JOURNAL_VERSION;
use fieldsync_core::{EntityKind, LocalStore};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal format version.
    pub journal_version: u16,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Cached entities per kind.
    pub entities: Vec<KindStats>,
    /// Actions waiting for replay.
    pub pending_actions: usize,
    /// Actions needing manual resolution.
    pub failed_actions: usize,
    /// Uploads waiting for replay.
    pub pending_uploads: usize,
    /// Uploads needing manual resolution.
    pub failed_uploads: usize,
    /// Downloaded files tracked by the cache.
    pub cache_entries: usize,
    /// Bytes accounted to cached files.
    pub cache_bytes: u64,
}

/// Entity counts for one kind.
#[derive(Debug, Serialize)]
pub struct KindStats {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entities cached.
    pub total: usize,
    /// Entities with changes the server has not confirmed.
    pub unconfirmed: usize,
}

/// Collects statistics from an open store.
pub fn collect(path: &Path, store: &LocalStore) -> CliResult<InspectResult> {
    let counts = store.counts();
    let entities = EntityKind::ALL
        .iter()
        .map(|kind| {
            let entities = store.list_entities(*kind);
            KindStats {
                kind: *kind,
                total: entities.len(),
                unconfirmed: entities.iter().filter(|e| e.pending_sync).count(),
            }
        })
        .collect();
    let cache = store.list_cache_entries();

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_version: JOURNAL_VERSION,
        journal_bytes: store.journal_size()?,
        entities,
        pending_actions: counts.pending_actions,
        failed_actions: counts.failed_actions,
        pending_uploads: counts.pending_uploads,
        failed_uploads: counts.failed_uploads,
        cache_entries: cache.len(),
        cache_bytes: cache.iter().map(|entry| entry.size_bytes).sum(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let store = open_store(path)?;
    let result = collect(path, &store)?;

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            print_text_output(&result);
            Ok(())
        }
    }
}

fn print_text_output(result: &InspectResult) {
    println!("FieldSync Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!(
        "Journal: {} (format v{})",
        format_size(result.journal_bytes),
        result.journal_version
    );
    println!();
    println!("Entities:");
    for stats in &result.entities {
        println!(
            "  {:<12} {:>6} ({} unconfirmed)",
            stats.kind.as_str(),
            stats.total,
            stats.unconfirmed
        );
    }
    println!();
    println!("Queues:");
    println!(
        "  Actions: {} pending, {} failed",
        result.pending_actions, result.failed_actions
    );
    println!(
        "  Uploads: {} pending, {} failed",
        result.pending_uploads, result.failed_uploads
    );
    println!();
    println!(
        "Cache: {} files, {}",
        result.cache_entries,
        format_size(result.cache_bytes)
    );
}
