//! Evict command implementation.

use super::{format_size, open_store, CliResult};
use fieldsync_engine::{CacheConfig, CacheEvictionManager, EvictionReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Runs the evict command.
pub fn run(
    path: &Path,
    cache_dir: PathBuf,
    max_age_hours: Option<u64>,
    max_size_mb: Option<u64>,
) -> CliResult<()> {
    let store = Arc::new(open_store(path)?);

    let mut config = CacheConfig::new(cache_dir);
    if let Some(hours) = max_age_hours {
        config = config.with_max_age(Duration::from_secs(hours * 3600));
    }
    if let Some(mb) = max_size_mb {
        config = config.with_max_size_bytes(mb * 1024 * 1024);
    }

    let cache = CacheEvictionManager::new(Arc::clone(&store), config);
    let report = cache.evict()?;
    store.flush()?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &EvictionReport) {
    if report.removed() == 0 {
        println!(
            "Cache within bounds ({}), nothing evicted.",
            format_size(report.remaining_bytes)
        );
        return;
    }
    println!("Evicted {} files:", report.removed());
    for file_id in &report.evicted {
        println!("  {file_id}");
    }
    println!("  Expired:   {}", report.expired);
    println!("  Oversize:  {}", report.oversize);
    println!("  Freed:     {}", format_size(report.bytes_freed));
    println!("  Remaining: {}", format_size(report.remaining_bytes));
}
