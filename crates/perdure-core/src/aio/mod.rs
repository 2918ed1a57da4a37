//! Asynchronous I/O plane: typed submissions multiplexed over subsystems.
//!
//! The AIO plane is the kernel's only doorway to the outside world. The
//! scheduler hands it batches of submission queue entries ([`Sqe`]), each
//! tagged with the coroutine and handle that yielded it; subsystem workers
//! consume them concurrently with the kernel thread and push completion
//! queue entries ([`Cqe`]) back. Order across subsystems is unspecified —
//! coroutines correlate by handle, not by order.
//!
//! Subsystems: the transactional [store](store), the worker-side
//! [queue](queue) transport, and a loopback [echo](echo) used by tests and
//! benches.

pub mod echo;
pub mod plane;
pub mod queue;
pub mod store;
mod types;

pub use plane::{Aio, Processor};
pub use types::{
    Command, CommandResult, Completion, EchoCompletion, EchoSubmission, QueueCompletion,
    QueueSubmission, ReadElapsedTasksCommand, ReadTaskCommand, ReadTaskResult, ReadTasksCommand,
    ReadTasksResult, StoreCompletion, StoreSubmission, Submission, SubmissionKind,
    SubmissionPayload, Tags, Transaction, UpdateTaskCommand, UpdateTaskResult,
};

use crate::coroutine::{CoroutineId, Handle};
use crate::status::PlatformError;

/// A submission queue entry: a submission tagged with its origin.
#[derive(Debug)]
pub struct Sqe<S> {
    /// The coroutine that yielded the submission.
    pub coroutine: CoroutineId,
    /// The handle awaiting the completion.
    pub handle: Handle,
    /// The submission itself.
    pub submission: S,
}

/// A completion queue entry, routed back by coroutine and handle.
#[derive(Debug)]
pub struct Cqe<C> {
    /// The coroutine that yielded the originating submission.
    pub coroutine: CoroutineId,
    /// The handle the completion fulfills.
    pub handle: Handle,
    /// The completion, or the subsystem's failure.
    pub completion: Result<C, PlatformError>,
}

/// The scheduler's view of an I/O plane.
///
/// `submit` never rejects a batch wholesale: entries that cannot be accepted
/// (full or dead subsystem queue) come back as failed completions from
/// `drain`, so the originating coroutine sees the error on its own handle.
pub trait SubmissionPlane<S, C> {
    /// Accepts a batch of tagged submissions.
    fn submit(&mut self, batch: Vec<Sqe<S>>);

    /// Returns up to `max` completions that became ready since the last call.
    fn drain(&mut self, max: usize) -> Vec<Cqe<C>>;
}
