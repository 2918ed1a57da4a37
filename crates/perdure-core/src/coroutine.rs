//! Primitive cooperative coroutines with typed yield/resume.
//!
//! A coroutine is a suspendable computation polymorphic over two types: the
//! submission it yields and the completion it awaits. Rust already has
//! first-class suspendable computations — futures — so a coroutine here is an
//! `async` block polled by hand, plus a [`Context`] shared with the scheduler
//! through which submissions and completions flow:
//!
//! - [`Context::submit`] registers an outstanding submission and returns an
//!   [`Awaitable`] handle without suspending;
//! - awaiting the handle suspends the coroutine until the scheduler routes
//!   the matching completion back;
//! - [`Context::dispatch`] composes the two;
//! - [`Context::time`] reads the tick's logical clock, stable across
//!   suspensions within a tick.
//!
//! A coroutine may hold any number of outstanding handles and await them in
//! any order; this is how the enqueue pass fans out queue deliveries and
//! collects their results. Readiness is correlated by handle, never by
//! wakers, so coroutines are polled with a no-op waker.
//!
//! Everything here is single-threaded by design: contexts are `Rc`-shared
//! between a coroutine and the scheduler that owns it, and futures are not
//! required to be `Send`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Poll, RawWaker, RawWakerVTable, Waker};

use crate::status::PlatformError;

/// Identifies one outstanding submission within a coroutine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Handle(u64);

/// Identifies a coroutine within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(pub u64);

impl std::fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "coroutine:{}", self.0)
    }
}

/// One completion slot: registered on yield, filled exactly once on resume.
enum Slot<C> {
    Waiting,
    Ready(Result<C, PlatformError>),
}

struct Shared<S, C> {
    time: i64,
    next_handle: u64,
    /// Submissions yielded since the scheduler last collected.
    yielded: Vec<(Handle, S)>,
    slots: HashMap<Handle, Slot<C>>,
}

impl<S, C> Shared<S, C> {
    fn new() -> Self {
        Self {
            time: 0,
            next_handle: 0,
            yielded: Vec::new(),
            slots: HashMap::new(),
        }
    }
}

/// The coroutine's view of its scheduler: yield, await, and the tick clock.
pub struct Context<S, C> {
    shared: Rc<RefCell<Shared<S, C>>>,
}

impl<S, C> Clone for Context<S, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<S, C> Context<S, C> {
    fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared::new())),
        }
    }

    /// Returns the tick's logical wall-clock in milliseconds.
    ///
    /// The value is set by the scheduler before each poll, so it is stable
    /// between two suspension points. Handlers must use this instead of
    /// reading wall time, which keeps them drivable by a virtual clock.
    #[must_use]
    pub fn time(&self) -> i64 {
        self.shared.borrow().time
    }

    /// Registers an outstanding submission (yield without suspending).
    ///
    /// The submission is handed to the AIO plane at the next scheduler tick;
    /// the returned handle resolves once the matching completion arrives.
    pub fn submit(&self, submission: S) -> Awaitable<S, C> {
        let mut shared = self.shared.borrow_mut();
        let handle = Handle(shared.next_handle);
        shared.next_handle += 1;
        shared.yielded.push((handle, submission));
        shared.slots.insert(handle, Slot::Waiting);

        Awaitable {
            shared: Rc::clone(&self.shared),
            handle,
        }
    }

    /// Yields a submission and awaits its completion.
    ///
    /// # Errors
    ///
    /// Returns the subsystem's [`PlatformError`] if the submission failed.
    pub async fn dispatch(&self, submission: S) -> Result<C, PlatformError> {
        self.submit(submission).await
    }

    /// Drains submissions yielded since the last collection.
    pub(crate) fn take_yielded(&self) -> Vec<(Handle, S)> {
        std::mem::take(&mut self.shared.borrow_mut().yielded)
    }

    /// Fills a handle's slot with its completion.
    ///
    /// # Panics
    ///
    /// Panics if the handle was already fulfilled: a completion is delivered
    /// exactly once, and a duplicate indicates an AIO plane bug.
    pub(crate) fn fulfill(&self, handle: Handle, completion: Result<C, PlatformError>) {
        let mut shared = self.shared.borrow_mut();
        match shared.slots.insert(handle, Slot::Ready(completion)) {
            Some(Slot::Waiting) => {}
            Some(Slot::Ready(_)) | None => {
                panic!("completion delivered twice for handle {handle:?}")
            }
        }
    }

    pub(crate) fn set_time(&self, time: i64) {
        self.shared.borrow_mut().time = time;
    }
}

/// A pending completion, awaited at most once.
pub struct Awaitable<S, C> {
    shared: Rc<RefCell<Shared<S, C>>>,
    handle: Handle,
}

impl<S, C> Future for Awaitable<S, C> {
    type Output = Result<C, PlatformError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.shared.borrow_mut();
        match shared.slots.get(&self.handle) {
            Some(Slot::Waiting) => return Poll::Pending,
            Some(Slot::Ready(_)) => {}
            None => panic!("handle {:?} awaited twice", self.handle),
        }
        let Some(Slot::Ready(completion)) = shared.slots.remove(&self.handle) else {
            unreachable!("slot vanished between peek and take")
        };
        Poll::Ready(completion)
    }
}

/// The result of polling a coroutine once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The coroutine suspended on an unfulfilled handle.
    Suspended,
    /// The coroutine ran to completion and must be removed.
    Done,
}

/// A suspendable computation owned by the scheduler.
///
/// The coroutine's future is constructed from a closure receiving the
/// [`Context`]; its terminal result (response or error) is delivered through
/// whatever callback the closure captured, so the future's output is `()`.
pub struct Coroutine<S, C> {
    name: &'static str,
    context: Context<S, C>,
    future: Pin<Box<dyn Future<Output = ()>>>,
}

impl<S: 'static, C: 'static> Coroutine<S, C> {
    /// Creates a coroutine from an async constructor.
    pub fn new<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(Context<S, C>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let context = Context::new();
        let future = Box::pin(f(context.clone()));
        Self {
            name,
            context,
            future,
        }
    }

    /// Returns the coroutine's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the context shared with this coroutine.
    pub(crate) fn context(&self) -> &Context<S, C> {
        &self.context
    }

    /// Runs the coroutine until it suspends or completes.
    pub(crate) fn step(&mut self, time: i64) -> Step {
        self.context.set_time(time);
        let waker = noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        match self.future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => Step::Done,
            Poll::Pending => Step::Suspended,
        }
    }
}

impl<S, C> std::fmt::Debug for Coroutine<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine").field("name", &self.name).finish()
    }
}

/// Builds a waker that does nothing: readiness is tracked by handle, so a
/// suspended coroutine is resumed by the scheduler, never by a waker.
fn noop_waker() -> Waker {
    const fn raw() -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    fn clone(_: *const ()) -> RawWaker {
        raw()
    }
    fn noop(_: *const ()) {}
    const VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);

    // SAFETY: the vtable functions are all no-ops over a null pointer.
    unsafe { Waker::from_raw(raw()) }
}
