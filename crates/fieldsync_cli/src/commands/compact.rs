//! Compact command implementation.

use super::{format_size, open_store, CliResult};
use std::path::Path;

/// Runs the compact command.
///
/// The journal is rewritten as a single snapshot record; a dry run only
/// reports the current size.
pub fn run(path: &Path, dry_run: bool) -> CliResult<()> {
    let store = open_store(path)?;

    println!("Compacting journal at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
        println!("  Journal size: {}", format_size(store.journal_size()?));
        return Ok(());
    }

    let stats = store.compact()?;
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!("  Size before: {}", format_size(stats.bytes_before));
    println!("  Size after:  {}", format_size(stats.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if stats.bytes_before > 0 {
            saved as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}
