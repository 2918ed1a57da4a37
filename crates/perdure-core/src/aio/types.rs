//! Typed submissions and completions for the AIO plane.
//!
//! Every kernel I/O is a [`Submission`] routed to the subsystem named by its
//! [`SubmissionKind`], answered by a [`Completion`] of the matching kind. A
//! store submission carries a [`Transaction`] — an ordered list of commands
//! applied all-or-nothing — and its completion carries one result per command
//! in the same order.

use std::collections::HashMap;

use crate::task::{Task, TaskRecord, TaskState};

/// Free-form tags propagated from requests for metrics/tracing.
pub type Tags = HashMap<String, String>;

/// The subsystems a submission can be routed to. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionKind {
    /// The transactional store.
    Store,
    /// The worker-side task queue transport.
    Queue,
    /// Loopback subsystem; echoes its payload (tests and benches).
    Echo,
}

impl std::fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Store => "store",
            Self::Queue => "queue",
            Self::Echo => "echo",
        })
    }
}

/// A unit of I/O yielded by a coroutine.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Tags propagated from the originating request.
    pub tags: Tags,
    /// The subsystem-specific payload.
    pub payload: SubmissionPayload,
}

/// Subsystem-specific submission payloads.
#[derive(Debug, Clone)]
pub enum SubmissionPayload {
    /// A store transaction.
    Store(StoreSubmission),
    /// A task delivery to the worker transport.
    Queue(QueueSubmission),
    /// A loopback payload.
    Echo(EchoSubmission),
}

impl Submission {
    /// Returns the subsystem this submission routes to.
    #[must_use]
    pub const fn kind(&self) -> SubmissionKind {
        match self.payload {
            SubmissionPayload::Store(_) => SubmissionKind::Store,
            SubmissionPayload::Queue(_) => SubmissionKind::Queue,
            SubmissionPayload::Echo(_) => SubmissionKind::Echo,
        }
    }
}

/// A store transaction to execute.
#[derive(Debug, Clone)]
pub struct StoreSubmission {
    /// The transaction; commands apply in order, all-or-nothing.
    pub transaction: Transaction,
}

/// An ordered list of store commands.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Commands, applied in order.
    pub commands: Vec<Command>,
}

/// Store commands used by the task core.
#[derive(Debug, Clone)]
pub enum Command {
    /// Read a single task row by id.
    ReadTask(ReadTaskCommand),
    /// Read tasks by state whose overall deadline has not elapsed.
    ReadTasks(ReadTasksCommand),
    /// Read non-terminal tasks whose expiration or deadline has elapsed.
    ReadElapsedTasks(ReadElapsedTasksCommand),
    /// Conditionally update a task row.
    UpdateTask(UpdateTaskCommand),
}

/// Reads one task row.
#[derive(Debug, Clone)]
pub struct ReadTaskCommand {
    /// The task id.
    pub id: String,
}

/// Reads up to `limit` rows with `state ∈ states` that are due, i.e. whose
/// `expiration ≤ time`.
///
/// Fresh rows carry a zero expiration and are always due; a failed enqueue
/// pushes the expiration out, so the due-ness filter doubles as the retry
/// backoff.
#[derive(Debug, Clone)]
pub struct ReadTasksCommand {
    /// States to match.
    pub states: Vec<TaskState>,
    /// The logical time bound.
    pub time: i64,
    /// Maximum rows returned.
    pub limit: usize,
}

/// Reads up to `limit` non-terminal rows whose `expiration ≤ time` or
/// `timeout ≤ time`.
#[derive(Debug, Clone)]
pub struct ReadElapsedTasksCommand {
    /// The logical time bound.
    pub time: i64,
    /// Maximum rows returned.
    pub limit: usize,
}

/// Conditionally updates one task row.
///
/// The update commits iff the stored row still has `state ∈ current_states`
/// and `counter = current_counter`; otherwise it affects zero rows. This
/// guard is the kernel's optimistic-concurrency primitive.
#[derive(Debug, Clone)]
pub struct UpdateTaskCommand {
    /// The task id.
    pub id: String,
    /// New claim owner, cleared with `None`.
    pub process_id: Option<String>,
    /// New state.
    pub state: TaskState,
    /// New counter value.
    pub counter: u64,
    /// New attempt value.
    pub attempt: u64,
    /// New heartbeat period.
    pub frequency: i64,
    /// New holder deadline.
    pub expiration: i64,
    /// New completion timestamp, set iff the new state is terminal.
    pub completed_on: Option<i64>,
    /// Guard: states the stored row may be in.
    pub current_states: Vec<TaskState>,
    /// Guard: counter the stored row must have.
    pub current_counter: u64,
}

/// A task delivery handed to the worker transport.
#[derive(Debug, Clone)]
pub struct QueueSubmission {
    /// The task to deliver.
    pub task: Task,
}

/// A loopback payload.
#[derive(Debug, Clone)]
pub struct EchoSubmission {
    /// Returned unchanged in the completion.
    pub data: String,
}

/// A completed unit of I/O, routed back to the yielding coroutine.
#[derive(Debug)]
pub enum Completion {
    /// Results of a store transaction.
    Store(StoreCompletion),
    /// Outcome of a task delivery.
    Queue(QueueCompletion),
    /// The echoed payload.
    Echo(EchoCompletion),
}

impl Completion {
    /// Returns the subsystem this completion came from.
    #[must_use]
    pub const fn kind(&self) -> SubmissionKind {
        match self {
            Self::Store(_) => SubmissionKind::Store,
            Self::Queue(_) => SubmissionKind::Queue,
            Self::Echo(_) => SubmissionKind::Echo,
        }
    }

    /// Unwraps a store completion.
    ///
    /// # Panics
    ///
    /// Panics on any other kind: a coroutine receiving a mismatched
    /// completion is a routing bug, not a runtime fault.
    #[must_use]
    pub fn into_store(self) -> StoreCompletion {
        match self {
            Self::Store(completion) => completion,
            other => panic!("expected store completion, got {}", other.kind()),
        }
    }

    /// Unwraps a queue completion.
    ///
    /// # Panics
    ///
    /// Panics on any other kind.
    #[must_use]
    pub fn into_queue(self) -> QueueCompletion {
        match self {
            Self::Queue(completion) => completion,
            other => panic!("expected queue completion, got {}", other.kind()),
        }
    }

    /// Unwraps an echo completion.
    ///
    /// # Panics
    ///
    /// Panics on any other kind.
    #[must_use]
    pub fn into_echo(self) -> EchoCompletion {
        match self {
            Self::Echo(completion) => completion,
            other => panic!("expected echo completion, got {}", other.kind()),
        }
    }
}

/// Results of a store transaction, one per command, in command order.
#[derive(Debug)]
pub struct StoreCompletion {
    /// Per-command results.
    pub results: Vec<CommandResult>,
}

impl StoreCompletion {
    /// Returns the sole result of a single-command transaction.
    ///
    /// # Panics
    ///
    /// Panics if the transaction did not produce exactly one result; a
    /// mismatched result shape is a store bug.
    #[must_use]
    pub fn into_single(self) -> CommandResult {
        assert_eq!(
            self.results.len(),
            1,
            "transaction must produce exactly one result per command"
        );
        self.results
            .into_iter()
            .next()
            .expect("length asserted above")
    }
}

/// Per-command store results.
#[derive(Debug)]
pub enum CommandResult {
    /// Result of [`Command::ReadTask`].
    ReadTask(ReadTaskResult),
    /// Result of [`Command::ReadTasks`] or [`Command::ReadElapsedTasks`].
    ReadTasks(ReadTasksResult),
    /// Result of [`Command::UpdateTask`].
    UpdateTask(UpdateTaskResult),
}

impl CommandResult {
    /// Unwraps a read-task result.
    ///
    /// # Panics
    ///
    /// Panics on any other result shape.
    #[must_use]
    pub fn into_read_task(self) -> ReadTaskResult {
        match self {
            Self::ReadTask(result) => result,
            other => panic!("expected read-task result, got {other:?}"),
        }
    }

    /// Unwraps a read-tasks result.
    ///
    /// # Panics
    ///
    /// Panics on any other result shape.
    #[must_use]
    pub fn into_read_tasks(self) -> ReadTasksResult {
        match self {
            Self::ReadTasks(result) => result,
            other => panic!("expected read-tasks result, got {other:?}"),
        }
    }

    /// Unwraps an update result.
    ///
    /// # Panics
    ///
    /// Panics on any other result shape.
    #[must_use]
    pub fn into_update_task(self) -> UpdateTaskResult {
        match self {
            Self::UpdateTask(result) => result,
            other => panic!("expected update-task result, got {other:?}"),
        }
    }
}

/// Result of a single-row read: zero or one rows.
#[derive(Debug)]
pub struct ReadTaskResult {
    /// Number of rows returned, 0 or 1.
    pub rows_returned: usize,
    /// The row, if present.
    pub record: Option<TaskRecord>,
}

/// Result of a batch read.
#[derive(Debug)]
pub struct ReadTasksResult {
    /// Number of rows returned.
    pub rows_returned: usize,
    /// The rows.
    pub records: Vec<TaskRecord>,
}

/// Result of a guarded update: zero rows means the guard did not match.
#[derive(Debug)]
pub struct UpdateTaskResult {
    /// Number of rows affected, 0 or 1.
    pub rows_affected: usize,
}

/// Outcome of a task delivery.
#[derive(Debug)]
pub struct QueueCompletion {
    /// Whether the transport accepted the task.
    pub success: bool,
}

/// The echoed payload.
#[derive(Debug)]
pub struct EchoCompletion {
    /// The submission's data, unchanged.
    pub data: String,
}
