//! The AIO multiplexer and its subsystem workers.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError, channel, sync_channel};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use super::types::{Completion, Submission, SubmissionKind};
use super::{Cqe, Sqe, SubmissionPlane};
use crate::status::{ErrorCode, PlatformError};

/// Executes one subsystem's submissions on a worker thread.
///
/// A processor runs concurrently with the kernel thread; it owns whatever
/// state its subsystem needs (a store connection, a transport client) and
/// answers every submission with exactly one completion or failure.
pub trait Processor: Send + 'static {
    /// The submission kind this processor serves.
    fn kind(&self) -> SubmissionKind;

    /// Processes one submission.
    ///
    /// # Errors
    ///
    /// Returns a [`PlatformError`] if the subsystem failed; the error is
    /// routed to the awaiting coroutine.
    fn process(&mut self, submission: Submission) -> Result<Completion, PlatformError>;
}

/// Multiplexes submissions over subsystems keyed by [`SubmissionKind`].
///
/// One worker thread per registered subsystem, fed by a bounded channel;
/// all workers share one completion channel back to the kernel thread.
/// Backpressure is per-subsystem: a full submission queue turns that entry
/// into an immediate `AioSubmissionQueueFull` completion without blocking
/// the kernel.
pub struct Aio {
    subsystems: HashMap<SubmissionKind, SyncSender<Sqe<Submission>>>,
    completion_tx: Sender<Cqe<Completion>>,
    completion_rx: Receiver<Cqe<Completion>>,
    /// Failure completions produced on the kernel thread itself.
    rejected: VecDeque<Cqe<Completion>>,
    workers: Vec<JoinHandle<()>>,
}

impl Aio {
    /// Creates an empty plane; subsystems are registered before the kernel
    /// loop starts.
    #[must_use]
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = channel();
        Self {
            subsystems: HashMap::new(),
            completion_tx,
            completion_rx,
            rejected: VecDeque::new(),
            workers: Vec::new(),
        }
    }

    /// Registers a subsystem and spawns its worker thread.
    ///
    /// `queue_size` bounds the subsystem's submission queue; submissions
    /// beyond it fail with `AioSubmissionQueueFull`.
    ///
    /// # Panics
    ///
    /// Panics if a subsystem of the same kind is already registered, or if
    /// the worker thread cannot be spawned.
    pub fn register(&mut self, mut processor: impl Processor, queue_size: usize) {
        let kind = processor.kind();
        assert!(
            !self.subsystems.contains_key(&kind),
            "subsystem {kind} registered twice"
        );

        let (tx, rx) = sync_channel::<Sqe<Submission>>(queue_size);
        let completion_tx = self.completion_tx.clone();
        let worker = std::thread::Builder::new()
            .name(format!("aio-{kind}"))
            .spawn(move || {
                while let Ok(sqe) = rx.recv() {
                    let completion = processor.process(sqe.submission);
                    let cqe = Cqe {
                        coroutine: sqe.coroutine,
                        handle: sqe.handle,
                        completion,
                    };
                    if completion_tx.send(cqe).is_err() {
                        // Kernel side is gone; nothing left to do.
                        break;
                    }
                }
            })
            .expect("failed to spawn aio worker thread");

        self.subsystems.insert(kind, tx);
        self.workers.push(worker);
    }
}

impl Default for Aio {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionPlane<Submission, Completion> for Aio {
    fn submit(&mut self, batch: Vec<Sqe<Submission>>) {
        for sqe in batch {
            let kind = sqe.submission.kind();
            let Some(tx) = self.subsystems.get(&kind) else {
                panic!("no subsystem registered for submission kind {kind}")
            };

            match tx.try_send(sqe) {
                Ok(()) => {}
                Err(TrySendError::Full(sqe)) => {
                    debug!(%kind, "aio submission queue full");
                    self.rejected.push_back(Cqe {
                        coroutine: sqe.coroutine,
                        handle: sqe.handle,
                        completion: Err(PlatformError::new(
                            ErrorCode::AioSubmissionQueueFull,
                            format!("{kind} submission queue is full"),
                        )),
                    });
                }
                Err(TrySendError::Disconnected(sqe)) => {
                    warn!(%kind, "aio subsystem worker is gone");
                    self.rejected.push_back(Cqe {
                        coroutine: sqe.coroutine,
                        handle: sqe.handle,
                        completion: Err(PlatformError::new(
                            ErrorCode::InternalServer,
                            format!("{kind} subsystem worker is gone"),
                        )),
                    });
                }
            }
        }
    }

    fn drain(&mut self, max: usize) -> Vec<Cqe<Completion>> {
        let mut completions = Vec::new();
        while completions.len() < max {
            if let Some(cqe) = self.rejected.pop_front() {
                completions.push(cqe);
                continue;
            }
            match self.completion_rx.try_recv() {
                Ok(cqe) => completions.push(cqe),
                Err(_) => break,
            }
        }
        completions
    }
}

impl Drop for Aio {
    fn drop(&mut self) {
        // Disconnect the submission channels so workers drain and exit.
        self.subsystems.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::super::echo::EchoProcessor;
    use super::super::types::{EchoSubmission, SubmissionPayload, Tags};
    use super::*;
    use crate::coroutine::{CoroutineId, Handle};

    fn echo_sqe(data: &str) -> Sqe<Submission> {
        Sqe {
            coroutine: CoroutineId(1),
            handle: Handle::default(),
            submission: Submission {
                tags: Tags::new(),
                payload: SubmissionPayload::Echo(EchoSubmission {
                    data: data.to_string(),
                }),
            },
        }
    }

    fn drain_blocking(aio: &mut Aio, n: usize) -> Vec<Cqe<Completion>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while out.len() < n {
            out.extend(aio.drain(n - out.len()));
            assert!(Instant::now() < deadline, "timed out draining completions");
            std::thread::yield_now();
        }
        out
    }

    #[test]
    fn round_trips_through_echo_subsystem() {
        let mut aio = Aio::new();
        aio.register(EchoProcessor::new(), 16);

        aio.submit(vec![echo_sqe("ping")]);
        let cqes = drain_blocking(&mut aio, 1);

        let echo = cqes
            .into_iter()
            .next()
            .unwrap()
            .completion
            .unwrap()
            .into_echo();
        assert_eq!(echo.data, "ping");
    }

    #[test]
    fn full_queue_produces_immediate_failure() {
        struct Gated {
            gate: std::sync::mpsc::Receiver<()>,
            started: std::sync::mpsc::Sender<()>,
        }
        impl Processor for Gated {
            fn kind(&self) -> SubmissionKind {
                SubmissionKind::Echo
            }
            fn process(&mut self, submission: Submission) -> Result<Completion, PlatformError> {
                self.started.send(()).unwrap();
                self.gate.recv().unwrap();
                EchoProcessor::new().process(submission)
            }
        }

        let (gate_tx, gate_rx) = std::sync::mpsc::channel();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let mut aio = Aio::new();
        aio.register(
            Gated {
                gate: gate_rx,
                started: started_tx,
            },
            1,
        );

        // First submission occupies the worker, second fills the queue.
        aio.submit(vec![echo_sqe("a")]);
        started_rx.recv().unwrap();
        aio.submit(vec![echo_sqe("b")]);

        // Third cannot be accepted and fails immediately.
        aio.submit(vec![echo_sqe("c")]);
        let rejected = aio.drain(1);
        assert_eq!(rejected.len(), 1);
        let err = rejected.into_iter().next().unwrap().completion.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AioSubmissionQueueFull);

        // Release the worker; the two accepted submissions still complete.
        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        let done = drain_blocking(&mut aio, 2);
        assert!(done.iter().all(|cqe| cqe.completion.is_ok()));
    }

    #[test]
    #[should_panic(expected = "no subsystem registered")]
    fn missing_subsystem_is_a_programming_error() {
        let mut aio = Aio::new();
        aio.submit(vec![echo_sqe("lost")]);
    }
}
