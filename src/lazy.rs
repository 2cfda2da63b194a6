//! The lazy task runtime.
//!
//! A [`Lazy`] is a suspended computation that does nothing until it is
//! started or awaited. Binding an executor with [`Lazy::via`] yields a
//! [`RescheduleLazy`] whose every resumption is dispatched through that
//! executor, decoupling I/O completion threads from application logic
//! threads. Completion is delivered exactly once as an
//! [`Outcome`](crate::Outcome) to the callback passed to `start`.

use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Wake, Waker};

use crate::executor::{ContextGuard, Executor};
use crate::outcome::{Failure, Outcome};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

/// Driver states. A wake in `RUNNING` marks the task notified so the driver
/// re-polls before going idle; a wake in `IDLE` claims the dispatch.
const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

thread_local! {
    static CURRENT_EXECUTOR: RefCell<Option<Arc<dyn Executor>>> = RefCell::new(None);
}

/// The executor of the task currently being polled on this thread, if any.
///
/// Set for the duration of each poll; leaf futures use it to reach the
/// executor their task is bound to.
pub fn current_executor() -> Option<Arc<dyn Executor>> {
    CURRENT_EXECUTOR.with(|current| current.borrow().clone())
}

struct ExecutorScope {
    previous: Option<Arc<dyn Executor>>,
}

impl ExecutorScope {
    fn enter(executor: Option<Arc<dyn Executor>>) -> Self {
        let previous = CURRENT_EXECUTOR.with(|current| current.replace(executor));
        ExecutorScope { previous }
    }
}

impl Drop for ExecutorScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_EXECUTOR.with(|current| {
            *current.borrow_mut() = previous;
        });
    }
}

/// The shared driver of one started task.
///
/// Owns the future while it is suspended, the completion callback, and the
/// checked-out affinity guard between a suspension and its wake. Also serves
/// as the task's waker.
struct Driver<T> {
    state: AtomicU8,
    future: Mutex<Option<BoxFuture<T>>>,
    callback: Mutex<Option<Callback<T>>>,
    affinity: Mutex<Option<ContextGuard>>,
    executor: Option<Arc<dyn Executor>>,
}

/// Locks that are never held across user code cannot stay poisoned in any
/// state we care about; recover the guard rather than unwinding in a waker.
fn relock<'a, U>(mutex: &'a Mutex<U>) -> MutexGuard<'a, U> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Send + 'static> Driver<T> {
    fn launch(future: BoxFuture<T>, executor: Option<Arc<dyn Executor>>, callback: Callback<T>) {
        let driver = Arc::new(Driver {
            state: AtomicU8::new(SCHEDULED),
            future: Mutex::new(Some(future)),
            callback: Mutex::new(Some(callback)),
            affinity: Mutex::new(None),
            executor,
        });
        Driver::dispatch(&driver);
    }

    /// Resume the task where its affinity says it should resume: through the
    /// checked-out token when one is held, through a plain `schedule` for a
    /// bound task's first run, or inline when no executor is bound.
    fn dispatch(this: &Arc<Self>) {
        let guard = relock(&this.affinity).take();
        match (&this.executor, guard) {
            (Some(_), Some(guard)) => {
                let driver = this.clone();
                guard.resume_with(Box::new(move || Driver::run(&driver)));
            }
            (Some(executor), None) => {
                let driver = this.clone();
                executor.schedule(Box::new(move || Driver::run(&driver)));
            }
            (None, _) => Driver::run(this),
        }
    }

    /// Poll the future until it suspends or finishes. A panic in the task
    /// body is captured into the outcome instead of unwinding into the
    /// executor.
    fn run(this: &Arc<Self>) {
        let waker = Waker::from(this.clone());
        loop {
            this.state.store(RUNNING, Ordering::Release);

            let mut future = match relock(&this.future).take() {
                Some(future) => future,
                // Completed or discarded; a stale wake has nothing to do.
                None => return,
            };

            let mut cx = Context::from_waker(&waker);
            let scope = ExecutorScope::enter(this.executor.clone());
            let polled = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
            drop(scope);

            match polled {
                Ok(Poll::Ready(value)) => {
                    this.complete(Outcome::from_value(value));
                    return;
                }
                Err(failure) => {
                    this.complete(Outcome::from_failure(failure));
                    return;
                }
                Ok(Poll::Pending) => {
                    *relock(&this.future) = Some(future);
                    if let Some(executor) = &this.executor {
                        // Check affinity out before going idle so the wake
                        // path can check its continuation back in.
                        *relock(&this.affinity) = Some(ContextGuard::checkout(executor.clone()));
                    }
                    match this.state.compare_exchange(
                        RUNNING,
                        IDLE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        // A wake landed mid-poll; poll again.
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    fn complete(&self, outcome: Outcome<T>) {
        self.state.store(COMPLETE, Ordering::Release);
        // An unconsumed affinity guard balances itself on drop.
        *relock(&self.affinity) = None;
        let callback = relock(&self.callback).take();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }

    fn resume(this: &Arc<Self>) {
        loop {
            match this.state.load(Ordering::Acquire) {
                IDLE => {
                    if this
                        .state
                        .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        Driver::dispatch(this);
                        return;
                    }
                }
                RUNNING => {
                    if this
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // SCHEDULED, NOTIFIED, COMPLETE: the wake is already covered.
                _ => return,
            }
        }
    }
}

impl<T: Send + 'static> Wake for Driver<T> {
    fn wake(self: Arc<Self>) {
        Driver::resume(&self);
    }
}

/// A suspended computation, inert until started or awaited.
///
/// `Lazy` is move-only; starting, awaiting, or binding an executor consumes
/// the handle, so a computation cannot be driven twice. Dropping an unstarted
/// `Lazy` releases the computation without running any of it.
///
/// ```
/// use sable::Lazy;
///
/// let task = Lazy::new(async { 1 + 1 });
/// task.start(|outcome| assert_eq!(outcome.value(), 2));
/// ```
pub struct Lazy<T> {
    future: Option<BoxFuture<T>>,
}

impl<T: Send + 'static> Lazy<T> {
    /// Wrap `future` as a lazy task. Nothing runs until the task is driven.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Lazy {
            future: Some(Box::pin(future)),
        }
    }

    /// Diagnostics only: true when the handle has given up its computation
    /// or finished. Not meaningful for control flow.
    pub fn is_ready(&self) -> bool {
        self.future.is_none()
    }

    /// Bind an executor, converting this task into one whose resumptions are
    /// always dispatched through `executor`.
    pub fn via(mut self, executor: Arc<dyn Executor>) -> RescheduleLazy<T> {
        let future = self
            .future
            .take()
            .expect("Lazy does not hold a computation");
        RescheduleLazy {
            future: Some(future),
            executor,
        }
    }

    /// Begin the computation. `callback` is invoked exactly once with the
    /// outcome, on whichever thread completes the final resumption; it runs
    /// on the caller's stack only if the computation never suspends.
    pub fn start<F>(mut self, callback: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let future = self
            .future
            .take()
            .expect("Lazy does not hold a computation");
        Driver::launch(future, None, Box::new(callback));
    }
}

impl<T: Send + 'static> Future for Lazy<T> {
    type Output = T;

    /// Awaiting a `Lazy` inside another task transfers the computation into
    /// the awaiting task; the inner completion resumes the outer
    /// continuation exactly once, on the outer task's execution context.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let future = this
            .future
            .as_mut()
            .expect("Lazy polled after completion");
        match future.as_mut().poll(cx) {
            Poll::Ready(value) => {
                this.future = None;
                Poll::Ready(value)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A task bound to an executor: every resumption, including the first, is
/// posted to the executor rather than run on the thread that signalled
/// completion of an awaited operation.
pub struct RescheduleLazy<T> {
    future: Option<BoxFuture<T>>,
    executor: Arc<dyn Executor>,
}

impl<T: Send + 'static> RescheduleLazy<T> {
    /// Begin the computation through the bound executor. `callback` fires
    /// exactly once with the outcome, on an executor thread.
    pub fn start<F>(mut self, callback: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let future = self
            .future
            .take()
            .expect("RescheduleLazy does not hold a computation");
        Driver::launch(future, Some(self.executor.clone()), Box::new(callback));
    }

    /// Diagnostics only; see [`Lazy::is_ready`].
    pub fn is_ready(&self) -> bool {
        self.future.is_none()
    }

    /// The executor this task is bound to.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Start the task and walk away. An uncaught failure in the task body is
    /// handed to `on_failure`; a clean completion is discarded.
    pub fn detach<H>(self, on_failure: H)
    where
        H: FnOnce(Failure) + Send + 'static,
    {
        self.start(move |outcome: Outcome<T>| {
            if let Some(failure) = outcome.into_error() {
                on_failure(failure);
            }
        });
    }
}

/// Suspend once and reschedule through the task's bound executor, letting
/// other queued work run.
///
/// # Panics
///
/// Yielding inside a task with no bound executor is a programming error and
/// panics (the failure is captured into the task's outcome like any other).
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            return Poll::Ready(());
        }
        let executor = current_executor().expect("yielding requires a bound executor");
        this.yielded = true;
        let waker = cx.waker().clone();
        executor.schedule(Box::new(move || waker.wake()));
        Poll::Pending
    }
}
