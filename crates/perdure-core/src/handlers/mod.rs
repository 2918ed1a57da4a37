//! Task lifecycle handlers.
//!
//! Every handler is a coroutine over the AIO plane. Request handlers
//! ([`claim_task`], [`complete_task`], [`heartbeat_task`]) resolve one API
//! request; periodic handlers ([`enqueue_tasks`], [`timeout_tasks`]) sweep
//! the store on a cadence set by the kernel loop.
//!
//! All of them follow the same discipline: read the row, classify by state,
//! and mutate only through an update guarded by the
//! `(current_states, current_counter)` snapshot just read. When a guarded
//! update reports zero affected rows, another coroutine won the race; a
//! request handler restarts from its read, a sweep simply leaves the row for
//! its next pass. The retry is unbounded in principle — the monotonic
//! counter and the absorbing terminal states guarantee it ends.

mod claim_task;
mod complete_task;
mod enqueue_tasks;
mod heartbeat_task;
mod timeout_tasks;

pub use claim_task::claim_task;
pub use complete_task::complete_task;
pub use enqueue_tasks::enqueue_tasks;
pub use heartbeat_task::heartbeat_task;
pub use timeout_tasks::timeout_tasks;

use tracing::error;

use crate::aio::{
    Command, Completion, ReadTaskCommand, ReadTaskResult, StoreSubmission, Submission,
    SubmissionPayload, Tags, Transaction,
};
use crate::coroutine::Context;
use crate::status::{ErrorCode, PlatformError};
use crate::task::{Task, TaskRecord};

/// Builds a store submission from a list of commands.
pub(crate) fn store_submission(tags: &Tags, commands: Vec<Command>) -> Submission {
    Submission {
        tags: tags.clone(),
        payload: SubmissionPayload::Store(StoreSubmission {
            transaction: Transaction { commands },
        }),
    }
}

/// Reads one task row, mapping any store failure.
pub(crate) async fn read_task(
    ctx: &Context<Submission, Completion>,
    tags: &Tags,
    id: &str,
) -> Result<ReadTaskResult, PlatformError> {
    let completion = ctx
        .dispatch(store_submission(
            tags,
            vec![Command::ReadTask(ReadTaskCommand { id: id.to_string() })],
        ))
        .await
        .map_err(|err| {
            error!(%err, id, "failed to read task");
            PlatformError::with_source(ErrorCode::AioStoreFailure, "failed to read task", err)
        })?;

    Ok(completion.into_store().into_single().into_read_task())
}

/// Parses a stored row, mapping the failure to a serialization error.
pub(crate) fn parse_record(record: &TaskRecord) -> Result<Task, PlatformError> {
    record.task().map_err(|err| {
        error!(%err, id = %record.id, "failed to parse task record");
        PlatformError::with_source(
            ErrorCode::AioStoreSerializationFailure,
            "failed to parse task record",
            err,
        )
    })
}
