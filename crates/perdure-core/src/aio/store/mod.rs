//! The transactional store subsystem.
//!
//! The store is the only shared mutable resource in the kernel. Handlers
//! never touch it directly: they yield store submissions whose transactions
//! are executed here, on the subsystem's worker thread, against a
//! [`StoreBackend`]. Commands apply in order and all-or-nothing; results
//! come back in command order.
//!
//! Guarded updates are what make the optimistic-concurrency model work: an
//! `UpdateTask` commits only while the stored row still matches the
//! `(current_states, current_counter)` snapshot the handler read, so a row
//! mutated by a racing coroutine simply reports zero affected rows.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

use super::plane::Processor;
use super::types::{
    CommandResult, Completion, StoreCompletion, Submission, SubmissionKind, SubmissionPayload,
    Transaction,
};
use crate::status::{ErrorCode, PlatformError};

/// Errors raised by store backends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A row could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Executes store transactions.
///
/// Implementations own their connection state and run on the store
/// subsystem's worker thread; they do not need internal synchronization for
/// command execution, only for any test-inspection handles they expose.
pub trait StoreBackend: Send + 'static {
    /// Executes a transaction, returning one result per command in order.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the transaction failed; no command of a
    /// failed transaction is applied.
    fn execute(&mut self, transaction: &Transaction) -> Result<Vec<CommandResult>, StoreError>;
}

/// The store subsystem processor: unwraps submissions, runs transactions.
pub struct StoreProcessor<B> {
    backend: B,
}

impl<B> StoreProcessor<B> {
    /// Wraps a backend for registration with the AIO plane.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: StoreBackend> Processor for StoreProcessor<B> {
    fn kind(&self) -> SubmissionKind {
        SubmissionKind::Store
    }

    fn process(&mut self, submission: Submission) -> Result<Completion, PlatformError> {
        let kind = submission.kind();
        let SubmissionPayload::Store(store) = submission.payload else {
            panic!("store subsystem routed a {kind} submission")
        };

        self.backend
            .execute(&store.transaction)
            .map(|results| Completion::Store(StoreCompletion { results }))
            .map_err(|err| {
                PlatformError::with_source(
                    ErrorCode::AioStoreFailure,
                    "store transaction failed",
                    err,
                )
            })
    }
}

/// Returns `true` if the stored state string matches any guard state.
///
/// Comparison is on the storage representation so that a corrupt row can
/// never satisfy a guard.
pub(crate) fn guard_matches(stored_state: &str, command: &super::types::UpdateTaskCommand) -> bool {
    command
        .current_states
        .iter()
        .any(|state| state.as_str() == stored_state)
}

/// The storage representations of the non-terminal states.
pub(crate) const NON_TERMINAL_STATES: [&str; 3] = ["init", "enqueued", "claimed"];

#[cfg(test)]
mod tests {
    use super::super::types::{Command, ReadTaskCommand, StoreSubmission, Tags};
    use super::*;
    use crate::task::TaskState;

    #[test]
    fn backend_failure_maps_to_store_failure() {
        struct Failing;
        impl StoreBackend for Failing {
            fn execute(
                &mut self,
                _transaction: &Transaction,
            ) -> Result<Vec<CommandResult>, StoreError> {
                Err(StoreError::Database(rusqlite::Error::InvalidQuery))
            }
        }

        let mut processor = StoreProcessor::new(Failing);
        let err = processor
            .process(Submission {
                tags: Tags::new(),
                payload: SubmissionPayload::Store(StoreSubmission {
                    transaction: Transaction {
                        commands: vec![Command::ReadTask(ReadTaskCommand {
                            id: "t1".to_string(),
                        })],
                    },
                }),
            })
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::AioStoreFailure);
    }

    #[test]
    fn guard_never_matches_a_corrupt_state() {
        let command = super::super::types::UpdateTaskCommand {
            id: "t1".to_string(),
            process_id: None,
            state: TaskState::Completed,
            counter: 0,
            attempt: 0,
            frequency: 0,
            expiration: 0,
            completed_on: Some(0),
            current_states: vec![TaskState::Init, TaskState::Enqueued, TaskState::Claimed],
            current_counter: 0,
        };

        assert!(guard_matches("claimed", &command));
        assert!(!guard_matches("garbled", &command));
        assert!(!guard_matches("completed", &command));
    }
}
