//! Retry bookkeeping shared by pending actions and pending uploads.

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue status of a pending entry.
///
/// Synced entries are deleted, so there is no `Synced` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Eligible for automatic replay.
    Pending,
    /// Excluded from replay until resolved manually.
    Failed,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueStatus::Pending => f.write_str("pending"),
            QueueStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Status, retry count and last-failure diagnostics of a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Current status.
    pub status: QueueStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Time of the last attempt.
    pub last_attempt_at: Option<Timestamp>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

impl RetryState {
    /// A fresh pending state.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: QueueStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Returns true if the entry is eligible for replay.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == QueueStatus::Pending
    }

    /// Records a failed attempt.
    ///
    /// The entry becomes `Failed` when the failure is not retryable or the
    /// retry budget is spent (`retry_count >= max_retry`).
    pub fn record_failure(
        &mut self,
        now: Timestamp,
        error: impl Into<String>,
        max_retry: u32,
        retryable: bool,
    ) -> QueueStatus {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.last_error = Some(error.into());
        if !retryable || self.retry_count >= max_retry {
            self.status = QueueStatus::Failed;
        }
        self.status
    }

    /// Marks the entry failed without consuming a retry.
    ///
    /// Used for local precondition failures such as a missing file.
    pub fn fail_now(&mut self, now: Timestamp, error: impl Into<String>) {
        self.last_attempt_at = Some(now);
        self.last_error = Some(error.into());
        self.status = QueueStatus::Failed;
    }

    /// Puts a failed entry back into the queue with a fresh budget.
    pub fn reset(&mut self) {
        self.status = QueueStatus::Pending;
        self.retry_count = 0;
        self.last_error = None;
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::pending()
    }
}
