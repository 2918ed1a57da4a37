//! The periodic enqueue pass.

use tracing::{debug, error};

use super::store_submission;
use crate::aio::{
    Command, Completion, QueueSubmission, ReadTasksCommand, Submission, SubmissionPayload, Tags,
    UpdateTaskCommand,
};
use crate::coroutine::{Context, Coroutine};
use crate::status::{ErrorCode, PlatformError};
use crate::system::Config;
use crate::task::TaskState;

/// Constructs one enqueue pass.
///
/// One pass reads a batch of `Init` tasks due for delivery (their expiration
/// has elapsed; a failed enqueue pushes it out, which is the retry backoff),
/// fans their deliveries out to the queue transport in parallel, and folds
/// every resulting transition into a single guarded transaction:
///
/// - delivery accepted → `Enqueued`, expiration one enqueue-delay out;
/// - delivery refused → still `Init`, attempt incremented, same expiration;
/// - deadline already passed → `Timedout`.
///
/// Per-record parse and delivery failures are logged and skipped, never
/// fatal to the batch. Every update keeps the task's counter and guards on
/// `Init`, so a task claimed or completed mid-pass is skipped harmlessly.
pub fn enqueue_tasks(config: &Config) -> Coroutine<Submission, Completion> {
    let batch = config.task_batch_size;
    let delay = i64::try_from(config.task_enqueue_delay.as_millis()).unwrap_or(i64::MAX);

    Coroutine::new("enqueue-tasks", move |ctx| async move {
        if let Err(err) = enqueue_pass(&ctx, batch, delay).await {
            error!(%err, "enqueue pass failed");
        }
    })
}

async fn enqueue_pass(
    ctx: &Context<Submission, Completion>,
    batch: usize,
    delay: i64,
) -> Result<(), PlatformError> {
    let tags = Tags::from([("handler".to_string(), "enqueue-tasks".to_string())]);

    let completion = ctx
        .dispatch(store_submission(
            &tags,
            vec![Command::ReadTasks(ReadTasksCommand {
                states: vec![TaskState::Init],
                time: ctx.time(),
                limit: batch,
            })],
        ))
        .await
        .map_err(|err| {
            error!(%err, "failed to read tasks");
            PlatformError::with_source(ErrorCode::AioStoreFailure, "failed to read tasks", err)
        })?;
    let read = completion.into_store().into_single().into_read_tasks();

    let mut commands = Vec::new();
    let mut awaiting = Vec::new();

    for record in &read.records {
        let task = match record.task() {
            Ok(task) => task,
            Err(err) => {
                error!(%err, id = %record.id, "failed to parse task, skipping");
                continue;
            }
        };

        if ctx.time() < task.timeout {
            let handle = ctx.submit(Submission {
                tags: tags.clone(),
                payload: SubmissionPayload::Queue(QueueSubmission { task: task.clone() }),
            });
            awaiting.push((task, handle));
        } else {
            commands.push(Command::UpdateTask(UpdateTaskCommand {
                id: task.id.clone(),
                process_id: None,
                state: TaskState::Timedout,
                counter: task.counter,
                attempt: task.attempt,
                frequency: 0,
                expiration: 0,
                completed_on: Some(task.timeout),
                current_states: vec![TaskState::Init],
                current_counter: task.counter,
            }));
        }
    }

    for (task, handle) in awaiting {
        let completion = match handle.await {
            Ok(completion) => completion,
            Err(err) => {
                error!(%err, id = %task.id, "failed to enqueue task, skipping");
                continue;
            }
        };

        if completion.into_queue().success {
            commands.push(Command::UpdateTask(UpdateTaskCommand {
                id: task.id.clone(),
                process_id: None,
                state: TaskState::Enqueued,
                counter: task.counter,
                attempt: task.attempt,
                frequency: 0,
                // Time allowed for a worker to claim before re-enqueueing.
                expiration: ctx.time() + delay,
                completed_on: None,
                current_states: vec![TaskState::Init],
                current_counter: task.counter,
            }));
        } else {
            commands.push(Command::UpdateTask(UpdateTaskCommand {
                id: task.id.clone(),
                process_id: None,
                state: TaskState::Init,
                counter: task.counter,
                attempt: task.attempt + 1,
                frequency: 0,
                // Time until the next enqueue attempt.
                expiration: ctx.time() + delay,
                completed_on: None,
                current_states: vec![TaskState::Init],
                current_counter: task.counter,
            }));
        }
    }

    if !commands.is_empty() {
        debug!(updates = commands.len(), "applying enqueue transitions");
        if let Err(err) = ctx
            .dispatch(store_submission(&tags, commands))
            .await
        {
            error!(%err, "failed to update tasks");
        }
    }

    Ok(())
}
