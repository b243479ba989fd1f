//! Pending actions: queued mutations awaiting replay.

use crate::clock::Timestamp;
use crate::id::{ActionId, EntityId};
use crate::mutation::Mutation;
use crate::status::{QueueStatus, RetryState};
use serde::{Deserialize, Serialize};

/// A queued mutation awaiting replay against the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Queue position; lower ids replay first.
    pub id: ActionId,
    /// Placeholder of the optimistically created entity, or the update target.
    pub local_id: EntityId,
    /// What to replay.
    pub mutation: Mutation,
    /// When the action was enqueued.
    pub created_at: Timestamp,
    /// Status and retry diagnostics.
    pub state: RetryState,
}

impl PendingAction {
    /// Creates a fresh pending action.
    #[must_use]
    pub fn new(id: ActionId, local_id: EntityId, mutation: Mutation, now: Timestamp) -> Self {
        Self {
            id,
            local_id,
            mutation,
            created_at: now,
            state: RetryState::pending(),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        self.state.status
    }

    /// Failed attempts so far.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.state.retry_count
    }

    /// Message of the last failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.state.last_error.as_deref()
    }
}
