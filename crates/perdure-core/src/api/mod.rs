//! Request/response envelope and the API ingress queue.
//!
//! Front-ends (HTTP, gRPC) live outside the kernel. They hold an
//! [`ApiHandle`], submit requests with a callback, and hear back exactly
//! once — with a [`Response`] carrying an application [`Status`], or with a
//! [`PlatformError`] when the infrastructure failed. The kernel loop drains
//! the ingress queue on its own thread.
//!
//! Every request carries a free-form `tags` map propagated into its
//! submissions and mirrored on the response, for metrics and tracing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aio::Tags;
use crate::status::{ErrorCode, PlatformError, Status};
use crate::task::Task;

/// The kinds of requests the kernel serves. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Claim an enqueued task for a worker.
    ClaimTask,
    /// Complete a claimed task.
    CompleteTask,
    /// Refresh the expiration of a claimed task.
    HeartbeatTask,
}

impl RequestKind {
    /// Returns the kind's stable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClaimTask => "claim-task",
            Self::CompleteTask => "complete-task",
            Self::HeartbeatTask => "heartbeat-task",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Free-form tags for metrics/tracing propagation.
    pub tags: Tags,
    /// The kind-specific payload.
    pub payload: RequestPayload,
}

impl Request {
    /// Returns the request's kind.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self.payload {
            RequestPayload::ClaimTask(_) => RequestKind::ClaimTask,
            RequestPayload::CompleteTask(_) => RequestKind::CompleteTask,
            RequestPayload::HeartbeatTask(_) => RequestKind::HeartbeatTask,
        }
    }
}

/// Kind-specific request payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPayload {
    /// Claim an enqueued task.
    ClaimTask(ClaimTaskRequest),
    /// Complete a claimed task.
    CompleteTask(CompleteTaskRequest),
    /// Refresh a claimed task's expiration.
    HeartbeatTask(HeartbeatTaskRequest),
}

/// Claims an enqueued task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTaskRequest {
    /// The task id.
    pub id: String,
    /// The counter observed by the caller.
    pub counter: u64,
    /// The claiming process.
    pub process_id: String,
    /// The heartbeat period the claimer commits to, in milliseconds.
    pub frequency: i64,
}

/// Completes a claimed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteTaskRequest {
    /// The task id.
    pub id: String,
    /// The counter of the claim being completed.
    pub counter: u64,
}

/// Refreshes a claimed task's expiration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatTaskRequest {
    /// The task id.
    pub id: String,
    /// The counter of the claim being refreshed.
    pub counter: u64,
}

/// A response envelope, mirroring the request's kind and tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The request's tags, propagated back.
    pub tags: Tags,
    /// The kind-specific payload.
    pub payload: ResponsePayload,
}

impl Response {
    /// Returns the response's kind.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self.payload {
            ResponsePayload::ClaimTask(_) => RequestKind::ClaimTask,
            ResponsePayload::CompleteTask(_) => RequestKind::CompleteTask,
            ResponsePayload::HeartbeatTask(_) => RequestKind::HeartbeatTask,
        }
    }

    /// Returns the task payload common to all current response kinds.
    #[must_use]
    pub const fn task_response(&self) -> &TaskResponse {
        match &self.payload {
            ResponsePayload::ClaimTask(r)
            | ResponsePayload::CompleteTask(r)
            | ResponsePayload::HeartbeatTask(r) => r,
        }
    }
}

/// Kind-specific response payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Outcome of a claim.
    ClaimTask(TaskResponse),
    /// Outcome of a completion.
    CompleteTask(TaskResponse),
    /// Outcome of a heartbeat.
    HeartbeatTask(TaskResponse),
}

/// Status plus the task it concerns, if one was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// The application status.
    pub status: Status,
    /// The task, when the store had a row to report.
    pub task: Option<Task>,
}

/// Delivers the terminal outcome of one request, exactly once.
pub type ResponseCallback = Box<dyn FnOnce(Result<Response, PlatformError>) + Send>;

/// One ingress entry: a request and its response callback.
pub struct ApiSqe {
    /// The request.
    pub request: Request,
    /// Invoked with the response or the platform error.
    pub callback: ResponseCallback,
}

/// The front-end side of the ingress queue. Cheap to clone.
#[derive(Clone)]
pub struct ApiHandle {
    tx: SyncSender<ApiSqe>,
    shutdown: Arc<AtomicBool>,
}

impl ApiHandle {
    /// Submits a request.
    ///
    /// The callback is always consumed: on a full queue it is invoked
    /// immediately with `ApiSubmissionQueueFull`, after shutdown with
    /// `SystemShuttingDown`.
    pub fn submit(&self, request: Request, callback: ResponseCallback) {
        if self.shutdown.load(Ordering::SeqCst) {
            callback(Err(PlatformError::new(
                ErrorCode::SystemShuttingDown,
                "system is shutting down",
            )));
            return;
        }

        match self.tx.try_send(ApiSqe { request, callback }) {
            Ok(()) => {}
            Err(TrySendError::Full(sqe)) => {
                (sqe.callback)(Err(PlatformError::new(
                    ErrorCode::ApiSubmissionQueueFull,
                    "api submission queue is full",
                )));
            }
            Err(TrySendError::Disconnected(sqe)) => {
                (sqe.callback)(Err(PlatformError::new(
                    ErrorCode::SystemShuttingDown,
                    "system is shutting down",
                )));
            }
        }
    }

    /// Initiates shutdown: subsequent submissions are refused, and the
    /// kernel loop exits once the queue and the scheduler drain.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// The kernel side of the ingress queue.
pub struct Api {
    rx: Receiver<ApiSqe>,
    stash: VecDeque<ApiSqe>,
    shutdown: Arc<AtomicBool>,
}

impl Api {
    /// Creates the ingress queue, returning the kernel side and the
    /// front-end handle.
    #[must_use]
    pub fn new(queue_size: usize) -> (Self, ApiHandle) {
        let (tx, rx) = sync_channel(queue_size);
        let shutdown = Arc::new(AtomicBool::new(false));
        (
            Self {
                rx,
                stash: VecDeque::new(),
                shutdown: Arc::clone(&shutdown),
            },
            ApiHandle { tx, shutdown },
        )
    }

    /// Dequeues up to `max` entries, waiting up to `wait` for the first.
    ///
    /// The wait is what lets the kernel loop self-pace when idle: with an
    /// empty queue the call blocks for the tick budget, then returns empty.
    pub fn dequeue(&mut self, max: usize, wait: Duration) -> Vec<ApiSqe> {
        let mut out = Vec::new();
        while out.len() < max {
            let Some(sqe) = self.stash.pop_front() else { break };
            out.push(sqe);
        }

        if out.is_empty() {
            match self.rx.recv_timeout(wait) {
                Ok(sqe) => out.push(sqe),
                Err(_) => return out,
            }
        }
        while out.len() < max {
            match self.rx.try_recv() {
                Ok(sqe) => out.push(sqe),
                Err(_) => break,
            }
        }
        out
    }

    /// Returns `true` once shutdown has been initiated and the queue is
    /// drained.
    pub fn done(&mut self) -> bool {
        if !self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        // Pull anything still in flight into the stash so it is served
        // before the loop exits.
        while let Ok(sqe) = self.rx.try_recv() {
            self.stash.push_back(sqe);
        }
        self.stash.is_empty()
    }
}
