//! # FieldSync Core
//!
//! Durable local state for the FieldSync offline-first client.
//!
//! This crate provides:
//! - An append-only journal over a [`fieldsync_storage`] backend
//! - [`LocalStore`]: entities, pending queues, id map and cache metadata,
//!   changed only through atomic transactions
//! - [`ActionQueue`] and [`UploadQueue`]: FIFO queues with retry budgets
//! - Typed [`Mutation`]s with placeholder id rewriting
//! - A change feed publishing queue counts after every commit
//!
//! Nothing here talks to the network; replay lives in `fieldsync_engine`.
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_core::{CoreError, EntityId, LocalStore, Mutation, NewDailyLog};
//!
//! let store = LocalStore::open_in_memory().unwrap();
//! let placeholder = EntityId::new_local();
//! store
//!     .transaction(|txn| {
//!         let draft = Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10"));
//!         store.actions().enqueue(txn, placeholder.clone(), draft, 0);
//!         Ok::<_, CoreError>(())
//!     })
//!     .unwrap();
//! assert_eq!(store.counts().pending_actions, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod cache_entry;
mod change_feed;
mod clock;
mod config;
mod dir;
mod entity;
mod error;
mod id;
pub mod journal;
mod mutation;
mod queue;
mod status;
mod store;
mod upload;

pub use action::PendingAction;
pub use cache_entry::CacheEntry;
pub use change_feed::{ChangeFeed, StoreEvent, SyncCounts};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::StoreConfig;
pub use dir::StoreDir;
pub use entity::{EntityKind, LocalEntity};
pub use error::{CoreError, CoreResult};
pub use id::{ActionId, EntityId, UploadId, LOCAL_ID_PREFIX};
pub use mutation::{ActionClass, DailyLogUpdate, Mutation, NewAnnotation, NewDailyLog};
pub use queue::{ActionQueue, Resolution, UploadQueue};
pub use status::{QueueStatus, RetryState};
pub use store::{CompactionStats, LocalStore, StoreOp, StoreTxn};
pub use upload::{GeoPoint, NewUpload, PendingUpload, UploadKind};
