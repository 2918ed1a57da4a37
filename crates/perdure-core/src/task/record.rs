//! Stored task rows and their parsing.

use serde_json::Value;
use thiserror::Error;

use super::{Task, TaskState};

/// Errors raised while parsing a stored task row.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskRecordError {
    /// The stored state string is not a recognized state.
    #[error("invalid task state: {value}")]
    InvalidState {
        /// The unrecognized state string.
        value: String,
    },

    /// The stored message is not valid JSON.
    #[error("invalid task message for {id}: {source}")]
    InvalidMessage {
        /// The task the message belongs to.
        id: String,
        /// The JSON parse failure.
        source: serde_json::Error,
    },
}

/// A task row as returned by the store subsystem.
///
/// The record keeps the stored representation (state as string, message as
/// raw JSON text) so that a corrupt row surfaces as a parse error at the
/// handler, not as a store failure. Batch handlers skip unparsable records;
/// single-task handlers fail with a serialization error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    /// Opaque task identifier.
    pub id: String,
    /// Owner of the current claim, if any.
    pub process_id: Option<String>,
    /// Stored state string.
    pub state: String,
    /// Stored message as raw JSON text.
    pub message: String,
    /// Absolute deadline for the whole task.
    pub timeout: i64,
    /// Monotonic claim epoch.
    pub counter: u64,
    /// Retry counter for enqueue failures.
    pub attempt: u64,
    /// Heartbeat period, in milliseconds.
    pub frequency: i64,
    /// Absolute deadline by which the current holder must act.
    pub expiration: i64,
    /// Creation timestamp.
    pub created_on: i64,
    /// Completion timestamp, set iff the state is terminal.
    pub completed_on: Option<i64>,
}

impl TaskRecord {
    /// Parses the stored row into a [`Task`].
    ///
    /// # Errors
    ///
    /// Returns a [`TaskRecordError`] if the state string or the message JSON
    /// cannot be parsed.
    pub fn task(&self) -> Result<Task, TaskRecordError> {
        let state = TaskState::parse(&self.state)?;
        let message: Value =
            serde_json::from_str(&self.message).map_err(|source| TaskRecordError::InvalidMessage {
                id: self.id.clone(),
                source,
            })?;

        Ok(Task {
            id: self.id.clone(),
            process_id: self.process_id.clone(),
            state,
            message,
            timeout: self.timeout,
            counter: self.counter,
            attempt: self.attempt,
            frequency: self.frequency,
            expiration: self.expiration,
            created_on: self.created_on,
            completed_on: self.completed_on,
        })
    }
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            process_id: task.process_id.clone(),
            state: task.state.as_str().to_string(),
            message: task.message.to_string(),
            timeout: task.timeout,
            counter: task.counter,
            attempt: task.attempt,
            frequency: task.frequency,
            expiration: task.expiration,
            created_on: task.created_on,
            completed_on: task.completed_on,
        }
    }
}
