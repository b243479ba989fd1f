//! # FieldSync Engine
//!
//! Replays queued offline work against the server and manages the local
//! binary cache.
//!
//! This crate provides:
//! - [`RemoteApi`]: the server operations replayed by a pass, with an HTTP
//!   binding ([`HttpRemoteApi`]) and a scriptable [`MockRemote`]
//! - [`SyncEngine`]: optimistic mutation entry points, the sync pass and
//!   reconciliation of server responses
//! - [`SyncScheduler`]: single-flight triggering, background job adapter and
//!   a periodic tokio driver
//! - [`cache`]: eviction, download progress and a bounded download pool
//!
//! ## Sync pass
//!
//! 1. Snapshot pending actions (FIFO) and pending uploads
//! 2. Replay actions in order, reconciling each success in one local
//!    transaction; a retryable failure halts the action phase
//! 3. Upload photos, then files; uploads never block each other
//!
//! ## Key Invariants
//!
//! - A queue entry is removed only in the transaction that applies its result
//! - Placeholder ids are rewritten through the id map before replay
//! - Entries that exhaust their retry budget stop replaying until resolved

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
mod config;
mod engine;
mod error;
mod http;
mod remote;
mod scheduler;

pub use cache::{CacheEvictionManager, DownloadTracker, EvictionReport};
pub use config::{CacheConfig, RetryConfig, SyncConfig};
pub use engine::{CancelHandle, PassReport, SyncEngine, SyncOutcome, SyncStats};
pub use error::{FailureClass, SyncError, SyncResult};
pub use http::{HttpClient, HttpRemoteApi, HttpRequest, HttpResponse, Method, TransportFailure};
pub use remote::{MockRemote, RemoteApi, RemoteCall, RemoteOperation, ServerEntity, UploadPayload};
pub use scheduler::{
    spawn_background_sync, spawn_periodic, BackgroundJob, JobConstraints, JobResult, SyncJob,
    SyncScheduler, SyncState, TriggerReason,
};
