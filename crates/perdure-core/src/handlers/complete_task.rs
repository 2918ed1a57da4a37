//! The complete-task handler.

use tracing::error;

use super::{parse_record, read_task, store_submission};
use crate::aio::{Command, Completion, Submission, Tags, UpdateTaskCommand};
use crate::api::{
    CompleteTaskRequest, Request, RequestPayload, Response, ResponseCallback, ResponsePayload,
    TaskResponse,
};
use crate::coroutine::{Context, Coroutine};
use crate::status::{ErrorCode, PlatformError, Status};
use crate::task::{Task, TaskState};

/// Constructs the coroutine resolving one complete-task request.
///
/// # Panics
///
/// Panics if the request is of a different kind; the kernel's dispatch
/// table routes by kind, so a mismatch is a bug.
pub fn complete_task(request: Request, callback: ResponseCallback) -> Coroutine<Submission, Completion> {
    let kind = request.kind();
    let RequestPayload::CompleteTask(payload) = request.payload else {
        panic!("complete-task handler spawned for a {kind} request")
    };

    Coroutine::new("complete-task", move |ctx| async move {
        callback(complete(&ctx, request.tags, payload).await);
    })
}

async fn complete(
    ctx: &Context<Submission, Completion>,
    tags: Tags,
    request: CompleteTaskRequest,
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

        let completed_on = ctx.time();
        let completion = ctx
            .dispatch(store_submission(
                &tags,
                vec![Command::UpdateTask(UpdateTaskCommand {
                    id: request.id.clone(),
                    process_id: None,
                    state: TaskState::Completed,
                    counter: request.counter,
                    attempt: 0,
                    frequency: 0,
                    expiration: 0,
                    completed_on: Some(completed_on),
                    current_states: vec![TaskState::Claimed],
                    current_counter: request.counter,
                })],
            ))
            .await
            .map_err(|err| {
                error!(%err, id = %request.id, "failed to complete task");
                PlatformError::with_source(
                    ErrorCode::AioStoreFailure,
                    "failed to complete task",
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
                Status::Created,
                Some(Task {
                    id: request.id.clone(),
                    process_id: None,
                    state: TaskState::Completed,
                    message: task.message,
                    timeout: task.timeout,
                    counter: request.counter,
                    attempt: 0,
                    frequency: 0,
                    expiration: 0,
                    created_on: task.created_on,
                    completed_on: Some(completed_on),
                }),
            );
        }
        // The row changed between the read and the update; start over.
    };

    Ok(Response {
        tags,
        payload: ResponsePayload::CompleteTask(TaskResponse { status, task }),
    })
}
