//! Local cache of downloaded binary content.
//!
//! Downloads stream into the cache directory and are registered in the
//! store's cache table. [`CacheEvictionManager`] keeps the cache within its
//! age and size bounds after every registration.

mod download;
mod eviction;
mod pool;

pub use download::{
    CachedFile, ContentSource, DownloadManager, DownloadProgress, DownloadStatus, DownloadTracker,
};
pub use eviction::{CacheEvictionManager, EvictionReport};
pub use pool::DownloadPool;
