//! The heartbeat-task handler.

use tracing::error;

use super::{parse_record, read_task, store_submission};
use crate::aio::{Command, Completion, Submission, Tags, UpdateTaskCommand};
use crate::api::{
    HeartbeatTaskRequest, Request, RequestPayload, Response, ResponseCallback, ResponsePayload,
    TaskResponse,
};
use crate::coroutine::{Context, Coroutine};
use crate::status::{ErrorCode, PlatformError, Status};
use crate::task::{Task, TaskState};

/// Constructs the coroutine resolving one heartbeat-task request.
///
/// A heartbeat pushes the claimed task's expiration one frequency period
/// past the current tick; the counter is untouched.
///
/// # Panics
///
/// Panics if the request is of a different kind.
pub fn heartbeat_task(
    request: Request,
    callback: ResponseCallback,
) -> Coroutine<Submission, Completion> {
    let kind = request.kind();
    let RequestPayload::HeartbeatTask(payload) = request.payload else {
        panic!("heartbeat-task handler spawned for a {kind} request")
    };

    Coroutine::new("heartbeat-task", move |ctx| async move {
        callback(heartbeat(&ctx, request.tags, payload).await);
    })
}

async fn heartbeat(
    ctx: &Context<Submission, Completion>,
    tags: Tags,
    request: HeartbeatTaskRequest,
) -> Result<Response, PlatformError> {
    let (status, task) = loop {
        let read = read_task(ctx, &tags, &request.id).await?;
        assert!(
            read.rows_returned <= 1,
            "read by id must return at most one row"
        );
        let Some(record) = read.record else {
            break (Status::TaskNotFound, None);
        };
        let task = parse_record(&record)?;

        if task.state.is_terminal() {
            break (Status::TaskAlreadyCompleted, Some(task));
        }
        if matches!(task.state, TaskState::Init | TaskState::Enqueued) {
            break (Status::TaskInvalidState, Some(task));
        }
        if task.counter != request.counter {
            break (Status::TaskInvalidCounter, Some(task));
        }

        let expiration = ctx.time() + task.frequency;
        let completion = ctx
            .dispatch(store_submission(
                &tags,
                vec![Command::UpdateTask(UpdateTaskCommand {
                    id: request.id.clone(),
                    process_id: task.process_id.clone(),
                    state: TaskState::Claimed,
                    counter: request.counter,
                    attempt: task.attempt,
                    frequency: task.frequency,
                    expiration,
                    completed_on: None,
                    current_states: vec![TaskState::Claimed],
                    current_counter: request.counter,
                })],
            ))
            .await
            .map_err(|err| {
                error!(%err, id = %request.id, "failed to heartbeat task");
                PlatformError::with_source(
                    ErrorCode::AioStoreFailure,
                    "failed to heartbeat task",
                    err,
                )
            })?;

        let result = completion.into_store().into_single().into_update_task();
        assert!(
            result.rows_affected <= 1,
            "guarded update must affect at most one row"
        );

        if result.rows_affected == 1 {
            break (
                Status::Ok,
                Some(Task {
                    expiration,
                    ..task
                }),
            );
        }
        // The row changed between the read and the update; start over.
    };

    Ok(Response {
        tags,
        payload: ResponsePayload::HeartbeatTask(TaskResponse { status, task }),
    })
}
