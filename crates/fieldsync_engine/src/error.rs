//! Error types for the sync engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// How a failed remote call is treated by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network failure or timeout. Retryable.
    Transport,
    /// 5xx response. Retryable.
    Server,
    /// 4xx or malformed response. Fails the entry immediately.
    Client,
    /// A local requirement is not met (missing file, orphaned reference).
    /// Fails the entry immediately.
    LocalPrecondition,
}

impl FailureClass {
    /// Returns true if the entry should stay queued for another attempt.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Transport | FailureClass::Server)
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The request did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// No network connectivity.
    #[error("not connected to server")]
    NotConnected,

    /// Server-side failure (5xx).
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response message.
        message: String,
    },

    /// The server rejected the request (4xx).
    #[error("request rejected {status}: {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Response message.
        message: String,
    },

    /// Response did not match the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request or response body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The file to upload no longer exists.
    #[error("missing file: {}", path.display())]
    MissingFile {
        /// Expected location.
        path: PathBuf,
    },

    /// A local requirement for replay is not met.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] fieldsync_core::CoreError),

    /// Local filesystem error outside the store (cache, downloads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a precondition failure.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Maps an HTTP status and message to an error.
    ///
    /// Returns `None` for success statuses.
    pub fn from_status(status: u16, message: impl Into<String>) -> Option<Self> {
        match status {
            200..=299 => None,
            500..=599 => Some(Self::Server {
                status,
                message: message.into(),
            }),
            _ => Some(Self::Client {
                status,
                message: message.into(),
            }),
        }
    }

    /// Classifies a failed remote call.
    ///
    /// Store failures and cancellation are not remote outcomes; they abort
    /// the pass instead of being recorded on the entry. They classify as
    /// `LocalPrecondition` so they are never retried blindly.
    #[must_use]
    pub fn classify(&self) -> FailureClass {
        match self {
            SyncError::Transport { .. } | SyncError::Timeout | SyncError::NotConnected => {
                FailureClass::Transport
            }
            SyncError::Server { .. } => FailureClass::Server,
            SyncError::Client { .. } | SyncError::Protocol(_) | SyncError::Codec(_) => {
                FailureClass::Client
            }
            SyncError::MissingFile { .. }
            | SyncError::Precondition(_)
            | SyncError::Store(_)
            | SyncError::Io(_)
            | SyncError::Cancelled => FailureClass::LocalPrecondition,
        }
    }

    /// Returns true if this error can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.classify().is_retryable()
    }

    /// Returns true for errors that must abort the pass rather than be
    /// recorded on a queue entry.
    #[must_use]
    pub fn aborts_pass(&self) -> bool {
        matches!(self, SyncError::Store(_) | SyncError::Cancelled)
    }
}
