//! Resolve command implementation.

use super::{open_store, CliResult};
use clap::ValueEnum;
use fieldsync_core::{ActionId, LocalStore, Resolution, UploadId};
use std::path::Path;

/// Queue holding the entry to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Target {
    /// A pending action.
    Action,
    /// A pending upload.
    Upload,
}

/// What to do with a failed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Decision {
    /// Drop the entry.
    Discard,
    /// Re-queue with a fresh retry budget.
    Retry,
}

impl From<Decision> for Resolution {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Discard => Resolution::Discard,
            Decision::Retry => Resolution::RetryNow,
        }
    }
}

/// Applies a resolution to one failed entry.
pub fn apply(store: &LocalStore, target: Target, id: u64, decision: Decision) -> CliResult<()> {
    match target {
        Target::Action => store
            .actions()
            .resolve_failed(ActionId::new(id), decision.into())?,
        Target::Upload => store
            .uploads()
            .resolve_failed(UploadId::new(id), decision.into())?,
    }
    Ok(())
}

/// Runs the resolve command.
pub fn run(path: &Path, target: Target, id: u64, decision: Decision) -> CliResult<()> {
    let store = open_store(path)?;
    apply(&store, target, id, decision)?;
    store.flush()?;
    println!("{:?} {} resolved: {:?}", target, id, decision);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{CoreError, EntityId, Mutation, NewDailyLog, QueueStatus};
    use fieldsync_testkit::TestStore;

    fn failed_action(store: &LocalStore) -> ActionId {
        let id = store
            .transaction(|txn| {
                Ok::<_, CoreError>(store.actions().enqueue(
                    txn,
                    EntityId::new_local(),
                    Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10")),
                    0,
                ))
            })
            .unwrap();
        store
            .actions()
            .record_failure(id, "request rejected 422", 3, false, 1)
            .unwrap();
        id
    }

    #[test]
    fn retry_requeues_failed_action() {
        let store = TestStore::memory();
        let id = failed_action(&store);

        apply(&store, Target::Action, id.as_u64(), Decision::Retry).unwrap();
        let action = store.get_action(id).unwrap();
        assert_eq!(action.status(), QueueStatus::Pending);
        assert_eq!(action.retry_count(), 0);
    }

    #[test]
    fn discard_removes_failed_action() {
        let store = TestStore::memory();
        let id = failed_action(&store);

        apply(&store, Target::Action, id.as_u64(), Decision::Discard).unwrap();
        assert!(store.get_action(id).is_none());
    }

    #[test]
    fn unknown_upload_is_an_error() {
        let store = TestStore::memory();
        assert!(apply(&store, Target::Upload, 42, Decision::Discard).is_err());
    }
}
