//! Metadata for downloaded binary content.

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A downloaded file held in the local binary cache.
///
/// Eviction orders by `downloaded_at`; `last_accessed_at` is diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Remote file id.
    pub file_id: String,
    /// Where the content lives on disk.
    pub local_path: PathBuf,
    /// Content size.
    pub size_bytes: u64,
    /// When the download completed.
    pub downloaded_at: Timestamp,
    /// Last time a reader opened the content.
    pub last_accessed_at: Timestamp,
}

impl CacheEntry {
    /// Creates an entry for a download that just completed.
    pub fn downloaded(
        file_id: impl Into<String>,
        local_path: impl Into<PathBuf>,
        size_bytes: u64,
        now: Timestamp,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            local_path: local_path.into(),
            size_bytes,
            downloaded_at: now,
            last_accessed_at: now,
        }
    }
}
