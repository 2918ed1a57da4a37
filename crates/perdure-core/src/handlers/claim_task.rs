//! The claim-task handler.

use tracing::error;

use super::{parse_record, read_task, store_submission};
use crate::aio::{Command, Completion, Submission, Tags, UpdateTaskCommand};
use crate::api::{
    ClaimTaskRequest, Request, RequestPayload, Response, ResponseCallback, ResponsePayload,
    TaskResponse,
};
use crate::coroutine::{Context, Coroutine};
use crate::status::{ErrorCode, PlatformError, Status};
use crate::task::{Task, TaskState};

/// Constructs the coroutine resolving one claim-task request.
///
/// A claim takes an enqueued task into `Claimed`, bumping the counter so
/// every stale reference to the previous epoch is fenced out.
///
/// # Panics
///
/// Panics if the request is of a different kind.
pub fn claim_task(request: Request, callback: ResponseCallback) -> Coroutine<Submission, Completion> {
    let kind = request.kind();
    let RequestPayload::ClaimTask(payload) = request.payload else {
        panic!("claim-task handler spawned for a {kind} request")
    };

    Coroutine::new("claim-task", move |ctx| async move {
        callback(claim(&ctx, request.tags, payload).await);
    })
}

async fn claim(
    ctx: &Context<Submission, Completion>,
    tags: Tags,
    request: ClaimTaskRequest,
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
        if task.state == TaskState::Claimed {
            break (Status::TaskAlreadyClaimed, Some(task));
        }
        if task.state == TaskState::Init {
            break (Status::TaskInvalidState, Some(task));
        }
        if task.counter != request.counter {
            break (Status::TaskInvalidCounter, Some(task));
        }

        let expiration = ctx.time() + request.frequency;
        let completion = ctx
            .dispatch(store_submission(
                &tags,
                vec![Command::UpdateTask(UpdateTaskCommand {
                    id: request.id.clone(),
                    process_id: Some(request.process_id.clone()),
                    state: TaskState::Claimed,
                    counter: request.counter + 1,
                    attempt: task.attempt,
                    frequency: request.frequency,
                    expiration,
                    completed_on: None,
                    current_states: vec![TaskState::Enqueued],
                    current_counter: request.counter,
                })],
            ))
            .await
            .map_err(|err| {
                error!(%err, id = %request.id, "failed to claim task");
                PlatformError::with_source(ErrorCode::AioStoreFailure, "failed to claim task", err)
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
                    process_id: Some(request.process_id.clone()),
                    state: TaskState::Claimed,
                    message: task.message,
                    timeout: task.timeout,
                    counter: request.counter + 1,
                    attempt: task.attempt,
                    frequency: request.frequency,
                    expiration,
                    created_on: task.created_on,
                    completed_on: None,
                }),
            );
        }
        // The row changed between the read and the update; start over.
    };

    Ok(Response {
        tags,
        payload: ResponsePayload::ClaimTask(TaskResponse { status, task }),
    })
}
