//! Synchronous bridge: block a plain thread on a task's completion.

use std::sync::{Arc, Condvar, Mutex};

use crate::executor::Executor;
use crate::lazy::{Lazy, RescheduleLazy};
use crate::outcome::Outcome;

/// A counting signal over a mutex/condvar pair.
///
/// `release` publishes one permit; `acquire` blocks until a permit is
/// available and consumes it.
pub struct Condition {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Condition {
    pub fn new() -> Self {
        Condition {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    pub fn release(&self) {
        let mut count = self
            .count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *count += 1;
        self.condvar.notify_one();
    }

    pub fn acquire(&self) {
        let mut count = self
            .count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *count == 0 {
            count = self
                .condvar
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *count -= 1;
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::new()
    }
}

mod sealed {
    pub trait Sealed {}
    impl<T: Send + 'static> Sealed for crate::Lazy<T> {}
    impl<T: Send + 'static> Sealed for crate::RescheduleLazy<T> {}
}

/// A task the synchronous bridge can drive: either flavor of lazy task.
pub trait BlockingTask<T>: sealed::Sealed {
    /// The bound executor, if any, for the self-deadlock guard.
    fn executor_hint(&self) -> Option<&Arc<dyn Executor>>;

    /// Start the task with a boxed completion callback.
    fn start_with(self, callback: Box<dyn FnOnce(Outcome<T>) + Send + 'static>);
}

impl<T: Send + 'static> BlockingTask<T> for Lazy<T> {
    fn executor_hint(&self) -> Option<&Arc<dyn Executor>> {
        None
    }

    fn start_with(self, callback: Box<dyn FnOnce(Outcome<T>) + Send + 'static>) {
        self.start(callback)
    }
}

impl<T: Send + 'static> BlockingTask<T> for RescheduleLazy<T> {
    fn executor_hint(&self) -> Option<&Arc<dyn Executor>> {
        Some(self.executor())
    }

    fn start_with(self, callback: Box<dyn FnOnce(Outcome<T>) + Send + 'static>) {
        self.start(callback)
    }
}

/// Drive `task` and block the calling thread until it completes, then return
/// its value (re-raising a captured failure on this thread).
///
/// # Panics
///
/// Panics immediately if called from a thread belonging to the task's own
/// executor: that thread would be blocking on work only it can run, which is
/// a deterministic deadlock and therefore a programming error.
pub fn sync_await<T, L>(task: L) -> T
where
    T: Send + 'static,
    L: BlockingTask<T>,
{
    if let Some(executor) = task.executor_hint() {
        assert!(
            !executor.current_thread_in_executor(),
            "sync_await may not be called from inside the task's own executor"
        );
    }

    let condition = Arc::new(Condition::new());
    let slot: Arc<Mutex<Outcome<T>>> = Arc::new(Mutex::new(Outcome::empty()));

    let done = condition.clone();
    let result = slot.clone();
    task.start_with(Box::new(move |outcome| {
        *result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = outcome;
        done.release();
    }));

    condition.acquire();
    let outcome = std::mem::take(
        &mut *slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    );
    outcome.value()
}
