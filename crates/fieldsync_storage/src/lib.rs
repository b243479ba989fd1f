//! # FieldSync Storage
//!
//! Byte store backends underneath the FieldSync local journal.
//!
//! Backends are **opaque append-only byte stores**. They know nothing about
//! journal records, entities or queues; `fieldsync_core` owns every format
//! decision.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral stores; clones share bytes so a
//!   test can "restart" a store on the same data
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"daily log").unwrap();
//! assert_eq!(backend.read_at(offset, 9).unwrap(), b"daily log");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
