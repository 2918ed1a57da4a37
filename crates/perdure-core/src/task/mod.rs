//! Task lifecycle types.
//!
//! A task is a unit of work handed to external workers through the queue
//! subsystem. Its durable row lives in the store; the kernel mutates it only
//! through guarded `UpdateTask` commands, so every transition is serialized
//! per row regardless of how many coroutines race on it.
//!
//! # State Machine
//!
//! ```text
//! Init --enqueue ok--------> Enqueued
//! Init --enqueue failed----> Init (attempt+1)
//! Init --timeout elapsed---> Timedout
//! Enqueued --claim---------> Claimed (new process_id, counter+1)
//! Claimed --heartbeat------> Claimed (expiration refreshed)
//! Claimed --complete-------> Completed
//! any non-terminal --expiration elapsed--> Init (counter+1, re-enqueued)
//! any non-terminal --timeout elapsed-----> Timedout
//! ```
//!
//! `Completed` and `Timedout` are absorbing: the guard of every update
//! command excludes them, so no transition out of a terminal state can ever
//! commit. `counter` is nondecreasing over a task's lifetime and increments
//! exactly when ownership may change (claim, expiration re-arm).

mod record;

pub use record::{TaskRecord, TaskRecordError};

use serde::{Deserialize, Serialize};

/// The lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task exists but has not been handed to a worker.
    Init,
    /// Task has been delivered to the worker transport.
    Enqueued,
    /// A worker owns the task until its expiration.
    Claimed,
    /// Task finished successfully. Terminal.
    Completed,
    /// Task ran out of time. Terminal.
    Timedout,
}

impl TaskState {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Enqueued => "enqueued",
            Self::Claimed => "claimed",
            Self::Completed => "completed",
            Self::Timedout => "timedout",
        }
    }

    /// Parses a state from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRecordError::InvalidState`] if the string is not a
    /// recognized state.
    pub fn parse(s: &str) -> Result<Self, TaskRecordError> {
        match s {
            "init" => Ok(Self::Init),
            "enqueued" => Ok(Self::Enqueued),
            "claimed" => Ok(Self::Claimed),
            "completed" => Ok(Self::Completed),
            "timedout" => Ok(Self::Timedout),
            _ => Err(TaskRecordError::InvalidState {
                value: s.to_string(),
            }),
        }
    }

    /// Returns `true` for the absorbing states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Timedout)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as seen by handlers and responses.
///
/// All timestamps are absolute milliseconds on the kernel's logical clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque task identifier.
    pub id: String,
    /// Owner of the current claim, if any.
    pub process_id: Option<String>,
    /// Lifecycle state.
    pub state: TaskState,
    /// Opaque payload handed to workers.
    pub message: serde_json::Value,
    /// Absolute deadline for the whole task.
    pub timeout: i64,
    /// Monotonic claim epoch.
    pub counter: u64,
    /// Retry counter for enqueue failures.
    pub attempt: u64,
    /// Heartbeat period for the current claim, in milliseconds.
    pub frequency: i64,
    /// Absolute deadline by which the current holder must act.
    pub expiration: i64,
    /// Creation timestamp.
    pub created_on: i64,
    /// Completion timestamp, set iff the state is terminal.
    pub completed_on: Option<i64>,
}
