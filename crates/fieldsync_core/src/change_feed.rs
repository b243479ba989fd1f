//! Change feed for observing committed store transactions.
//!
//! Every commit publishes a [`StoreEvent`] carrying fresh queue counts, so a
//! UI can keep "N pending / M failed" badges current without polling.
//!
//! ```rust,ignore
//! let receiver = store.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(StoreEvent::Committed { counts, .. }) = receiver.recv() {
//!         println!("{} pending", counts.pending_actions);
//!     }
//! });
//! ```

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};

/// Queue sizes at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    /// Actions awaiting replay.
    pub pending_actions: usize,
    /// Actions needing manual resolution.
    pub failed_actions: usize,
    /// Photo and file uploads awaiting replay.
    pub pending_uploads: usize,
    /// Uploads needing manual resolution.
    pub failed_uploads: usize,
}

impl SyncCounts {
    /// Returns true when nothing is queued or failed.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_actions == 0
            && self.failed_actions == 0
            && self.pending_uploads == 0
            && self.failed_uploads == 0
    }

    /// Total entries needing manual resolution.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed_actions + self.failed_uploads
    }
}

/// An event published after a store commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A transaction committed.
    Committed {
        /// Commit sequence number, starting at 1 for each opened store.
        sequence: u64,
        /// Queue sizes after the commit.
        counts: SyncCounts,
    },
}

/// Distributes store events to subscribers.
///
/// Events are delivered in commit order. Subscribers whose receiver was
/// dropped are removed on the next emit.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<StoreEvent>>>,
}

impl ChangeFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(sequence: u64, pending: usize) -> StoreEvent {
        StoreEvent::Committed {
            sequence,
            counts: SyncCounts {
                pending_actions: pending,
                ..SyncCounts::default()
            },
        }
    }

    #[test]
    fn subscribers_receive_in_order() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();

        feed.emit(committed(1, 1));
        feed.emit(committed(2, 0));

        assert_eq!(rx.recv().unwrap(), committed(1, 1));
        assert_eq!(rx.recv().unwrap(), committed(2, 0));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = ChangeFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        drop(rx1);
        feed.emit(committed(1, 0));

        assert_eq!(feed.subscriber_count(), 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn counts_helpers() {
        let counts = SyncCounts {
            pending_actions: 0,
            failed_actions: 2,
            pending_uploads: 0,
            failed_uploads: 1,
        };
        assert!(!counts.is_idle());
        assert_eq!(counts.failed(), 3);
        assert!(SyncCounts::default().is_idle());
    }
}
