//! The worker-side task queue subsystem.
//!
//! Delivery goes through the [`Transport`] trait; the real transports (HTTP
//! pollers, message brokers) live outside the kernel. A transport failure is
//! an expected outcome — the completion reports `success = false` and the
//! enqueue pass schedules a retry — so it is never surfaced as a platform
//! error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::plane::Processor;
use super::types::{Completion, QueueCompletion, Submission, SubmissionKind, SubmissionPayload};
use crate::status::PlatformError;
use crate::task::Task;

/// Delivers tasks to workers.
pub trait Transport: Send + 'static {
    /// Attempts to deliver one task; returns whether the transport accepted
    /// it.
    fn deliver(&mut self, task: &Task) -> bool;
}

/// The queue subsystem processor.
pub struct QueueProcessor<T> {
    transport: T,
}

impl<T> QueueProcessor<T> {
    /// Wraps a transport for registration with the AIO plane.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: Transport> Processor for QueueProcessor<T> {
    fn kind(&self) -> SubmissionKind {
        SubmissionKind::Queue
    }

    fn process(&mut self, submission: Submission) -> Result<Completion, PlatformError> {
        let kind = submission.kind();
        let SubmissionPayload::Queue(queue) = submission.payload else {
            panic!("queue subsystem routed a {kind} submission")
        };

        let success = self.transport.deliver(&queue.task);
        Ok(Completion::Queue(QueueCompletion { success }))
    }
}

/// In-memory transport: records deliveries, optionally refusing them.
///
/// The stand-in used by tests and by a kernel run without a real transport.
/// Cloned handles share state, so a test can flip the failure switch and
/// inspect deliveries while the transport runs on the queue worker.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    delivered: Arc<Mutex<Vec<Task>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryTransport {
    /// Creates a transport that accepts every delivery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the tasks delivered so far.
    #[must_use]
    pub fn delivered(&self) -> Vec<Task> {
        self.delivered
            .lock()
            .expect("transport mutex poisoned")
            .clone()
    }
}

impl Transport for InMemoryTransport {
    fn deliver(&mut self, task: &Task) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        self.delivered
            .lock()
            .expect("transport mutex poisoned")
            .push(task.clone());
        true
    }
}
