use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::error::{ExecutorError, Result};

/// A unit of deferred work accepted by an [`Executor`].
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// An opaque marker for "where to resume", produced by
/// [`Executor::checkout`] and consumed by [`Executor::checkin`].
///
/// The null token means the executor tracks no affinity; implementations that
/// pin work to a worker encode the worker identity here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextToken(Option<u64>);

impl ContextToken {
    /// The no-affinity token.
    pub const NULL: ContextToken = ContextToken(None);

    /// A token carrying an implementation-defined placement id.
    pub fn new(id: u64) -> Self {
        ContextToken(Some(id))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

/// Options honored by [`Executor::checkin_with`].
#[derive(Debug, Clone, Copy)]
pub struct ScheduleOptions {
    /// Whether the checked-in work should run promptly rather than queue
    /// behind unrelated work.
    pub prompt: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions { prompt: true }
    }
}

/// An abstraction capable of accepting deferred work and running it later,
/// possibly on another thread.
///
/// The executor is the synchronization boundary between I/O completion
/// threads and application logic: `schedule` and `checkin` must be callable
/// from arbitrary threads.
pub trait Executor: Send + Sync {
    /// Enqueue `work` for asynchronous execution. Returns whether the work
    /// was accepted.
    fn schedule(&self, work: Work) -> bool;

    /// Reentrancy probe: is the calling thread one of this executor's
    /// workers?
    fn current_thread_in_executor(&self) -> bool;

    /// Obtain a context token representing the logical place to resume.
    fn checkout(&self) -> ContextToken {
        ContextToken::NULL
    }

    /// Execute or schedule `work` honoring the affinity the token encodes.
    fn checkin_with(&self, work: Work, token: ContextToken, options: ScheduleOptions) -> bool {
        let _ = (token, options);
        self.schedule(work)
    }

    /// [`checkin_with`](Self::checkin_with) under default options.
    fn checkin(&self, work: Work, token: ContextToken) -> bool {
        self.checkin_with(work, token, ScheduleOptions::default())
    }
}

/// Schedule `work` on `executor` after `delay`, using a detached waiter
/// thread. A convenience, not part of the executor contract.
pub fn schedule_after(executor: Arc<dyn Executor>, delay: Duration, work: Work) {
    let spawned = thread::Builder::new()
        .name("sable-timer".to_owned())
        .spawn(move || {
            thread::sleep(delay);
            executor.schedule(work);
        });
    if let Err(e) = spawned {
        log::error!("failed to spawn timer thread: {}", e);
    }
}

/// A checked-out context token with a guaranteed matching checkin.
///
/// The wake path consumes the guard with [`resume_with`](Self::resume_with);
/// a guard dropped unconsumed checks in no-op work instead, so executors that
/// track in-flight tokens always see balanced checkout/checkin pairs.
pub struct ContextGuard {
    executor: Arc<dyn Executor>,
    token: Option<ContextToken>,
}

impl ContextGuard {
    /// Check a token out of `executor` and wrap it.
    pub fn checkout(executor: Arc<dyn Executor>) -> Self {
        let token = executor.checkout();
        ContextGuard {
            executor,
            token: Some(token),
        }
    }

    /// Check `work` back in under the held token.
    pub fn resume_with(mut self, work: Work) -> bool {
        let token = self.token.take().unwrap_or(ContextToken::NULL);
        self.executor.checkin(work, token)
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.executor.checkin(Box::new(|| {}), token);
        }
    }
}

/// A thread-pool executor managing demand-grown worker threads.
///
/// Workers pop queued [`Work`] items, run them, and exit after a period of
/// inactivity. The pool grows up to a maximum number of workers; idle workers
/// are woken through a condition variable before new threads are spawned.
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<Inner>,
}

/// Internal state shared between the pool handle and its worker threads
struct Inner {
    /// Duration a worker thread will wait for new work before shutting down
    keep_alive: Duration,
    /// Shared state protected by a mutex
    shared: Mutex<Shared>,
    /// Maximum number of worker threads allowed
    max_workers: usize,
    /// Condition variable for worker thread synchronization
    condvar: Condvar,
}

struct Shared {
    /// Queue of pending work
    queue: VecDeque<Work>,
    /// Current number of worker threads
    workers: usize,
    /// Number of idle worker threads
    idle: usize,
    /// Number of workers that have been notified of new work
    notified: usize,
    /// Thread ids of live workers, for the reentrancy probe
    threads: HashSet<ThreadId>,
}

impl ThreadPool {
    /// Creates a new pool.
    ///
    /// # Arguments
    /// * `max_workers` - Optional maximum number of worker threads. Defaults to 15 * CPU cores
    /// * `keep_alive` - Optional duration workers will wait for new work. Defaults to 6 seconds
    pub fn new(max_workers: Option<usize>, keep_alive: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    notified: 0,
                    threads: HashSet::new(),
                }),
                condvar: Condvar::new(),
                keep_alive: keep_alive.unwrap_or_else(|| Duration::from_secs(6)),
                max_workers: max_workers.unwrap_or_else(|| num_cpus::get() * 15),
            }),
        }
    }

    /// Spawns a new worker thread that will process work from the queue.
    fn spawn_worker(&self, inner: Arc<Inner>) -> Result<()> {
        thread::Builder::new()
            .name("sable-worker".to_owned())
            .spawn(move || {
                if let Err(e) = inner.run() {
                    log::error!("worker thread error: {}", e);
                }
            })
            .map_err(ExecutorError::ThreadSpawn)?;
        Ok(())
    }
}

impl Executor for ThreadPool {
    /// Enqueue work, waking an idle worker or spawning a new one if needed.
    fn schedule(&self, work: Work) -> bool {
        let result: Result<()> = (|| {
            let mut shared = self
                .inner
                .shared
                .lock()
                .map_err(|_| ExecutorError::LockPoisoned)?;

            shared.queue.push_back(work);

            if shared.idle == 0 && shared.workers != self.inner.max_workers {
                shared.workers += 1;
                let inner = self.inner.clone();
                self.spawn_worker(inner)?;
            } else if shared.idle > 0 {
                shared.idle -= 1;
                shared.notified += 1;
                self.inner.condvar.notify_one();
            }
            Ok(())
        })();

        match result {
            Ok(()) => true,
            Err(e) => {
                log::error!("failed to schedule work: {}", e);
                false
            }
        }
    }

    fn current_thread_in_executor(&self) -> bool {
        self.inner
            .shared
            .lock()
            .map(|shared| shared.threads.contains(&thread::current().id()))
            .unwrap_or(false)
    }
}

impl Inner {
    /// Main worker thread loop.
    ///
    /// The worker drains the queue, then waits on the condition variable and
    /// exits if no work arrives within the keep-alive duration.
    fn run(&self) -> Result<()> {
        let thread_id = thread::current().id();
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| ExecutorError::LockPoisoned)?;
        shared.threads.insert(thread_id);

        'alive: loop {
            while let Some(work) = shared.queue.pop_front() {
                drop(shared);
                if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                    log::error!("scheduled work panicked");
                }
                shared = self
                    .shared
                    .lock()
                    .map_err(|_| ExecutorError::LockPoisoned)?;
            }

            shared.idle += 1;

            loop {
                let result = self
                    .condvar
                    .wait_timeout(shared, self.keep_alive)
                    .map_err(|_| ExecutorError::LockPoisoned)?;

                shared = result.0;
                let timeout = result.1;

                if shared.notified != 0 {
                    shared.notified -= 1;
                    continue 'alive;
                }

                if timeout.timed_out() {
                    break 'alive;
                }
            }
        }

        shared.workers -= 1;
        shared.idle -= 1;
        shared.threads.remove(&thread_id);
        Ok(())
    }
}

/// A fixed set of executors handed out round-robin, one per accepted
/// connection.
pub struct ExecutorPool {
    executors: Vec<Arc<ThreadPool>>,
    next: AtomicUsize,
}

impl ExecutorPool {
    /// Creates `pool_size` thread pools (at least one), each configured with
    /// the given per-pool worker limit and keep-alive.
    pub fn new(pool_size: usize, max_workers: Option<usize>, keep_alive: Option<Duration>) -> Self {
        let pool_size = pool_size.max(1);
        ExecutorPool {
            executors: (0..pool_size)
                .map(|_| Arc::new(ThreadPool::new(max_workers, keep_alive)))
                .collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Hand out the next executor in rotation.
    pub fn get(&self) -> Arc<ThreadPool> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.executors.len();
        self.executors[index].clone()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    /// An inline executor that counts checkout/checkin calls, for verifying
    /// the guard keeps the pairing balanced.
    struct CountingExecutor {
        checked_out: AtomicUsize,
        checked_in: AtomicUsize,
    }

    impl CountingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(CountingExecutor {
                checked_out: AtomicUsize::new(0),
                checked_in: AtomicUsize::new(0),
            })
        }
    }

    impl Executor for CountingExecutor {
        fn schedule(&self, work: Work) -> bool {
            work();
            true
        }

        fn current_thread_in_executor(&self) -> bool {
            false
        }

        fn checkout(&self) -> ContextToken {
            let id = self.checked_out.fetch_add(1, Ordering::SeqCst);
            ContextToken::new(id as u64)
        }

        fn checkin_with(&self, work: Work, token: ContextToken, _: ScheduleOptions) -> bool {
            assert!(!token.is_null());
            self.checked_in.fetch_add(1, Ordering::SeqCst);
            work();
            true
        }
    }

    #[test]
    fn test_pool_creation() {
        let pool = ThreadPool::new(Some(4), Some(Duration::from_secs(10)));
        assert_eq!(pool.inner.max_workers, 4);
        assert_eq!(pool.inner.keep_alive, Duration::from_secs(10));
    }

    /// Work submitted to the pool is executed.
    #[test]
    fn test_work_execution() {
        let pool = ThreadPool::new(None, None);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let (tx, rx) = mpsc::channel();

        pool.schedule(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        }));

        rx.recv_timeout(Duration::from_secs(1))
            .expect("work execution timed out");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// The reentrancy probe answers true on a worker thread and false on the
    /// submitting thread.
    #[test]
    fn test_current_thread_probe() {
        let pool = ThreadPool::new(Some(1), None);
        let probe = pool.clone();
        let (tx, rx) = mpsc::channel();

        pool.schedule(Box::new(move || {
            tx.send(probe.current_thread_in_executor()).unwrap();
        }));

        let inside = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(inside);
        assert!(!pool.current_thread_in_executor());
    }

    /// A panicking work item is contained; the worker keeps serving.
    #[test]
    fn test_work_panic_is_contained() {
        let pool = ThreadPool::new(Some(1), None);
        let (tx, rx) = mpsc::channel();

        pool.schedule(Box::new(|| panic!("bad work")));
        pool.schedule(Box::new(move || {
            tx.send(()).unwrap();
        }));

        rx.recv_timeout(Duration::from_secs(1))
            .expect("worker did not survive the panic");
    }

    /// The default checkin falls through to schedule with a null token.
    #[test]
    fn test_default_checkin_schedules() {
        let pool = ThreadPool::new(None, None);
        let (tx, rx) = mpsc::channel();

        assert!(pool.checkout().is_null());
        pool.checkin(
            Box::new(move || {
                tx.send(()).unwrap();
            }),
            ContextToken::NULL,
        );

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    /// A consumed guard checks in exactly once; a dropped guard balances
    /// with a no-op checkin.
    #[test]
    fn test_context_guard_balance() {
        let ex = CountingExecutor::new();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let guard = ContextGuard::checkout(ex.clone());
        guard.resume_with(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        let unused = ContextGuard::checkout(ex.clone());
        drop(unused);

        assert_eq!(ex.checked_out.load(Ordering::SeqCst), 2);
        assert_eq!(ex.checked_in.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pool_round_robin() {
        let pool = ExecutorPool::new(2, Some(1), None);
        assert_eq!(pool.len(), 2);

        let first = pool.get();
        let second = pool.get();
        let third = pool.get();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_schedule_after() {
        let pool = Arc::new(ThreadPool::new(None, None));
        let (tx, rx) = mpsc::channel();

        schedule_after(
            pool,
            Duration::from_millis(20),
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );

        rx.recv_timeout(Duration::from_secs(1))
            .expect("delayed work never ran");
    }
}
