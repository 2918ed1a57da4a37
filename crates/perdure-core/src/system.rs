//! The kernel loop.
//!
//! [`System`] is a single owned value driving everything: it drains the API
//! ingress, spawns per-request and periodic coroutines from tables frozen at
//! startup, and ticks the scheduler. Per iteration:
//!
//! 1. read logical time from the [`Clock`];
//! 2. dequeue up to a batch of requests and spawn their handler coroutines
//!    (an unregistered request kind is a programming error and panics);
//! 3. spawn the periodic coroutines whose cadence divides the tick counter;
//! 4. tick the scheduler;
//! 5. exit once the API is drained and the scheduler is empty.
//!
//! The API dequeue waits up to the tick budget for the first request, so an
//! idle loop self-paces instead of spinning.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::aio::{Completion, Submission};
use crate::api::{Api, RequestKind, Request, ResponseCallback};
use crate::coroutine::Coroutine;
use crate::metrics::KernelMetrics;
use crate::scheduler::Scheduler;
use crate::status::{ErrorCode, PlatformError};

/// Provides the kernel loop's logical time.
///
/// Tests drive the kernel with a virtual clock; handlers never read wall
/// time directly.
pub trait Clock {
    /// Returns the current time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall-clock time in Unix milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as i64)
    }
}

/// A fixed virtual clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0
    }
}

/// Kernel configuration, frozen before the loop runs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Promise cache capacity (used by the promise handlers).
    pub promise_cache_size: usize,
    /// Timeout cache capacity (used by the timeout plumbing).
    pub timeout_cache_size: usize,
    /// Notification cache capacity (used by the notification plumbing).
    pub notification_cache_size: usize,
    /// Requests dequeued, and submissions handed to the AIO plane, per tick.
    pub submission_batch_size: usize,
    /// Completions drained from the AIO plane per tick.
    pub completion_batch_size: usize,
    /// Tasks read per enqueue or timeout pass.
    pub task_batch_size: usize,
    /// How long an enqueued task may sit unclaimed before re-enqueueing.
    pub task_enqueue_delay: Duration,
    /// Bound on queued plus live coroutines.
    pub scheduler_queue_size: usize,
    /// Bound on the API ingress queue.
    pub api_queue_size: usize,
    /// Bound on each AIO subsystem's submission queue.
    pub aio_queue_size: usize,
    /// Wall-clock budget of one tick; the idle API wait honors it.
    pub tick_budget: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            promise_cache_size: 100,
            timeout_cache_size: 100,
            notification_cache_size: 100,
            submission_batch_size: 100,
            completion_batch_size: 100,
            task_batch_size: 100,
            task_enqueue_delay: Duration::from_secs(10),
            scheduler_queue_size: 1_000,
            api_queue_size: 100,
            aio_queue_size: 100,
            tick_budget: Duration::from_millis(10),
        }
    }
}

/// Constructs the handler coroutine for one request.
pub type RequestHandler = Box<dyn Fn(Request, ResponseCallback) -> Coroutine<Submission, Completion>>;

/// Constructs one periodic coroutine.
pub type TickHandler = Box<dyn Fn(&Config) -> Coroutine<Submission, Completion>>;

/// The kernel: configuration, ingress, scheduler, and dispatch tables.
pub struct System {
    config: Config,
    api: Api,
    scheduler: Scheduler<Submission, Completion>,
    metrics: KernelMetrics,
    on_request: HashMap<RequestKind, RequestHandler>,
    on_tick: BTreeMap<u64, Vec<TickHandler>>,
    ticks: u64,
}

impl System {
    /// Creates a kernel over the given ingress and I/O plane.
    #[must_use]
    pub fn new(
        config: Config,
        api: Api,
        plane: Box<dyn crate::aio::SubmissionPlane<Submission, Completion>>,
        metrics: KernelMetrics,
    ) -> Self {
        let scheduler = Scheduler::new(
            plane,
            metrics.clone(),
            config.submission_batch_size,
            config.scheduler_queue_size,
        );
        Self {
            config,
            api,
            scheduler,
            metrics,
            on_request: HashMap::new(),
            on_tick: BTreeMap::new(),
            ticks: 0,
        }
    }

    /// Returns the kernel's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers the handler constructor for a request kind.
    ///
    /// # Panics
    ///
    /// Panics if the kind already has a handler; the tables are frozen
    /// before the loop runs, so a duplicate is a bug.
    pub fn add_on_request(&mut self, kind: RequestKind, handler: RequestHandler) {
        assert!(
            self.on_request.insert(kind, handler).is_none(),
            "handler for request kind {kind} registered twice"
        );
    }

    /// Registers a periodic coroutine spawned every `period` ticks.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn add_on_tick(&mut self, period: u64, handler: TickHandler) {
        assert!(period > 0, "tick period must be greater than zero");
        self.on_tick.entry(period).or_default().push(handler);
    }

    /// Runs the loop until the API is drained and the scheduler is empty.
    pub fn run(&mut self, clock: &dyn Clock) {
        loop {
            let t = clock.now_ms();
            self.tick(t);

            if self.api.done() && self.scheduler.done() {
                return;
            }
        }
    }

    /// Runs one kernel tick at logical time `t`.
    ///
    /// # Panics
    ///
    /// Panics if a dequeued request has no registered handler.
    pub fn tick(&mut self, t: i64) {
        if !self.api.done() {
            // Spawn request coroutines.
            let sqes = self
                .api
                .dequeue(self.config.submission_batch_size, self.config.tick_budget);
            for sqe in sqes {
                let kind = sqe.request.kind();
                debug!(%kind, "api request dequeued");

                assert!(
                    self.on_request.contains_key(&kind),
                    "no handler registered for request kind {kind}"
                );
                if !self.scheduler.has_capacity() {
                    warn!(%kind, "scheduler queue full, rejecting request");
                    (sqe.callback)(Err(PlatformError::new(
                        ErrorCode::SchedulerQueueFull,
                        "scheduler queue is full",
                    )));
                    continue;
                }

                let callback = self.instrumented(kind, sqe.callback);
                let coroutine = self.on_request[&kind](sqe.request, callback);
                self.scheduler
                    .add(coroutine)
                    .expect("scheduler capacity was checked before spawning");
            }

            // Spawn periodic coroutines.
            let mut periodic = Vec::new();
            for (period, handlers) in &self.on_tick {
                if self.ticks % period == 0 {
                    for handler in handlers {
                        periodic.push(handler(&self.config));
                    }
                }
            }
            for coroutine in periodic {
                if let Err(err) = self.scheduler.add(coroutine) {
                    warn!(%err, "dropping periodic coroutine");
                }
            }
        }

        self.scheduler.tick(t, self.config.completion_batch_size);
        self.ticks += 1;
    }

    /// Returns `true` when the scheduler has no work left.
    #[must_use]
    pub fn scheduler_done(&self) -> bool {
        self.scheduler.done()
    }

    /// Returns `true` when the API is shut down and drained.
    pub fn api_done(&mut self) -> bool {
        self.api.done()
    }

    /// Wraps a response callback with request metrics.
    fn instrumented(&self, kind: RequestKind, callback: ResponseCallback) -> ResponseCallback {
        let metrics = self.metrics.clone();
        Box::new(move |result| {
            let outcome = if result.is_ok() { "ok" } else { "error" };
            metrics.api_request_completed(kind.name(), outcome);
            callback(result);
        })
    }
}
