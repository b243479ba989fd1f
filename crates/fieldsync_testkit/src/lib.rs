//! # FieldSync Testkit
//!
//! Shared helpers for exercising queues, reconciliation and the cache.
//!
//! - [`TestStore`] opens a throwaway store and can [`TestStore::restart`] it
//!   on the same journal, the way an app relaunch would
//! - [`CrashableBackend`] cuts a journal write short to model process death
//! - [`generators`] holds proptest strategies for mutations, failure
//!   sequences and cache populations
//!
//! ```rust,ignore
//! use fieldsync_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! // enqueue work, then
//! let store = store.restart()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Glob-import everything a test usually needs.
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
