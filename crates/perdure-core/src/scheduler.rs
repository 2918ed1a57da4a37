//! The cooperative scheduler.
//!
//! Owns the set of live coroutines and drives them one tick at a time.
//! Per tick `T` with logical time `t`:
//!
//! 1. admit coroutines queued since the last tick, running each until its
//!    first suspension;
//! 2. collect submissions yielded by any runnable coroutine, bounded by the
//!    configured submission batch size, and hand them to the AIO plane;
//! 3. drain up to the completion batch size from the plane, fulfilling each
//!    handle exactly once;
//! 4. resume the coroutines whose handles were fulfilled; a coroutine that
//!    runs to completion is removed.
//!
//! Submissions yielded by a coroutine resumed in step 4 are collected at the
//! next tick's step 2, so within a tick the step order above is total.
//! Coroutines are stepped in admission order and resumed in completion
//! order, which keeps the schedule deterministic for a deterministic plane;
//! a coroutine whose handle is ready is never starved.
//!
//! Coroutines cannot block on wall time — they only await completions.
//! Periodic work is a fresh coroutine spawned by the kernel loop at its
//! configured cadence.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::aio::{Cqe, Sqe, SubmissionPlane};
use crate::coroutine::{Coroutine, CoroutineId, Step};
use crate::metrics::KernelMetrics;
use crate::status::{ErrorCode, PlatformError};

/// Drives coroutines over an I/O plane.
pub struct Scheduler<S, C> {
    plane: Box<dyn SubmissionPlane<S, C>>,
    metrics: KernelMetrics,
    submission_batch_size: usize,
    capacity: usize,
    next_id: u64,
    /// Admitted at the next tick.
    incoming: VecDeque<(CoroutineId, Coroutine<S, C>)>,
    /// Live coroutines in admission order.
    live: BTreeMap<CoroutineId, Coroutine<S, C>>,
    /// Collected submissions not yet handed to the plane.
    backlog: VecDeque<Sqe<S>>,
}

impl<S: 'static, C: 'static> Scheduler<S, C> {
    /// Creates a scheduler over the given plane.
    ///
    /// `submission_batch_size` bounds the submissions handed to the plane
    /// per tick; `capacity` bounds the number of queued plus live
    /// coroutines.
    pub fn new(
        plane: Box<dyn SubmissionPlane<S, C>>,
        metrics: KernelMetrics,
        submission_batch_size: usize,
        capacity: usize,
    ) -> Self {
        Self {
            plane,
            metrics,
            submission_batch_size,
            capacity,
            next_id: 0,
            incoming: VecDeque::new(),
            live: BTreeMap::new(),
            backlog: VecDeque::new(),
        }
    }

    /// Returns `true` if another coroutine can be admitted.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.incoming.len() + self.live.len() < self.capacity
    }

    /// Queues a coroutine for admission at the next tick.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerQueueFull` when the scheduler is at capacity.
    pub fn add(&mut self, coroutine: Coroutine<S, C>) -> Result<(), PlatformError> {
        if !self.has_capacity() {
            return Err(PlatformError::new(
                ErrorCode::SchedulerQueueFull,
                "scheduler queue is full",
            ));
        }

        let id = CoroutineId(self.next_id);
        self.next_id += 1;
        debug!(%id, name = coroutine.name(), "coroutine queued");
        self.incoming.push_back((id, coroutine));
        self.metrics.coroutine_added();
        Ok(())
    }

    /// Runs one tick at logical time `t`, draining up to
    /// `completion_batch_size` completions.
    pub fn tick(&mut self, t: i64, completion_batch_size: usize) {
        // 1. Admit queued coroutines and run them to their first suspension.
        while let Some((id, mut coroutine)) = self.incoming.pop_front() {
            match coroutine.step(t) {
                Step::Done => self.finish(id, &coroutine),
                Step::Suspended => {
                    self.live.insert(id, coroutine);
                }
            }
        }

        // 2. Collect yielded submissions and hand a bounded batch to the
        //    plane. The remainder stays in the backlog for the next tick.
        for (id, coroutine) in &self.live {
            for (handle, submission) in coroutine.context().take_yielded() {
                self.backlog.push_back(Sqe {
                    coroutine: *id,
                    handle,
                    submission,
                });
            }
        }
        if !self.backlog.is_empty() {
            let batch: Vec<Sqe<S>> = {
                let n = self.submission_batch_size.min(self.backlog.len());
                self.backlog.drain(..n).collect()
            };
            self.metrics.aio_submitted(batch.len());
            self.plane.submit(batch);
        }

        // 3. Drain completions and fulfill their handles.
        let mut resumable = Vec::new();
        for cqe in self.plane.drain(completion_batch_size) {
            self.metrics.aio_completed(cqe.completion.is_ok());
            let Cqe {
                coroutine: id,
                handle,
                completion,
            } = cqe;
            let Some(coroutine) = self.live.get(&id) else {
                // The coroutine returned without awaiting this handle.
                debug!(%id, "dropping completion for finished coroutine");
                continue;
            };
            coroutine.context().fulfill(handle, completion);
            if !resumable.contains(&id) {
                resumable.push(id);
            }
        }

        // 4. Resume fulfilled coroutines; completed ones are removed.
        for id in resumable {
            let Some(coroutine) = self.live.get_mut(&id) else {
                continue;
            };
            if coroutine.step(t) == Step::Done {
                let coroutine = self
                    .live
                    .remove(&id)
                    .expect("coroutine was just stepped from the live set");
                self.finish(id, &coroutine);
            }
        }
    }

    /// Returns `true` when no coroutines or submissions remain.
    #[must_use]
    pub fn done(&self) -> bool {
        self.incoming.is_empty() && self.live.is_empty() && self.backlog.is_empty()
    }

    fn finish(&mut self, id: CoroutineId, coroutine: &Coroutine<S, C>) {
        debug!(%id, name = coroutine.name(), "coroutine finished");
        self.metrics.coroutine_finished();
    }
}
