//! The periodic timeout pass.

use tracing::{debug, error};

use super::store_submission;
use crate::aio::{Command, Completion, ReadElapsedTasksCommand, Submission, Tags, UpdateTaskCommand};
use crate::coroutine::{Context, Coroutine};
use crate::status::{ErrorCode, PlatformError};
use crate::system::Config;
use crate::task::TaskState;

/// Constructs one timeout pass.
///
/// One pass reads a batch of non-terminal tasks whose expiration or overall
/// deadline has elapsed and folds the transitions into one transaction:
///
/// - deadline elapsed → `Timedout`, `completed_on` pinned to the deadline;
/// - holder expired (`Enqueued` unclaimed, `Claimed` without heartbeat) →
///   back to `Init` with the counter bumped, so the next enqueue pass
///   re-delivers it and the previous holder's epoch is fenced out.
///
/// `Init` rows inside their deadline are left alone — nothing holds them,
/// and the enqueue pass owns their progress. Every update guards on the
/// observed `(state, counter)` snapshot; rows that move mid-pass are picked
/// up by a later pass.
pub fn timeout_tasks(config: &Config) -> Coroutine<Submission, Completion> {
    let batch = config.task_batch_size;

    Coroutine::new("timeout-tasks", move |ctx| async move {
        if let Err(err) = timeout_pass(&ctx, batch).await {
            error!(%err, "timeout pass failed");
        }
    })
}

async fn timeout_pass(
    ctx: &Context<Submission, Completion>,
    batch: usize,
) -> Result<(), PlatformError> {
    let tags = Tags::from([("handler".to_string(), "timeout-tasks".to_string())]);

    let completion = ctx
        .dispatch(store_submission(
            &tags,
            vec![Command::ReadElapsedTasks(ReadElapsedTasksCommand {
                time: ctx.time(),
                limit: batch,
            })],
        ))
        .await
        .map_err(|err| {
            error!(%err, "failed to read elapsed tasks");
            PlatformError::with_source(
                ErrorCode::AioStoreFailure,
                "failed to read elapsed tasks",
                err,
            )
        })?;
    let read = completion.into_store().into_single().into_read_tasks();

    let mut commands = Vec::new();
    for record in &read.records {
        let task = match record.task() {
            Ok(task) => task,
            Err(err) => {
                error!(%err, id = %record.id, "failed to parse task, skipping");
                continue;
            }
        };

        if ctx.time() >= task.timeout {
            commands.push(Command::UpdateTask(UpdateTaskCommand {
                id: task.id.clone(),
                process_id: None,
                state: TaskState::Timedout,
                counter: task.counter,
                attempt: task.attempt,
                frequency: 0,
                expiration: 0,
                completed_on: Some(task.timeout),
                current_states: vec![task.state],
                current_counter: task.counter,
            }));
        } else if task.state != TaskState::Init {
            commands.push(Command::UpdateTask(UpdateTaskCommand {
                id: task.id.clone(),
                process_id: None,
                state: TaskState::Init,
                counter: task.counter + 1,
                attempt: 0,
                frequency: 0,
                expiration: 0,
                completed_on: None,
                current_states: vec![task.state],
                current_counter: task.counter,
            }));
        }
    }

    if !commands.is_empty() {
        debug!(updates = commands.len(), "applying timeout transitions");
        if let Err(err) = ctx.dispatch(store_submission(&tags, commands)).await {
            error!(%err, "failed to update tasks");
        }
    }

    Ok(())
}
