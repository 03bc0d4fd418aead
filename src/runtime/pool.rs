//! Work-stealing worker pool.
//!
//! A fixed set of worker threads, each owning a LIFO deque. Jobs spawned on a
//! worker thread go to that worker's deque; jobs spawned from anywhere else go
//! to the global queue. An idle worker drains its own deque, then the global
//! queue, then steals from a peer chosen by its [`DetRng`].
//!
//! Idle workers park on a condvar for at most `idle_park`. A `pending`
//! counter is incremented before a job is queued and decremented when it is
//! dequeued; a worker only parks while it reads zero under the sleep lock,
//! so a push that happens between the check and the wait is never lost.

use crossbeam_deque::{Stealer, Worker};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::JoinError;
use crate::runtime::scheduler::{GlobalQueue, steal_task};
use crate::tracing_compat::{debug, info, trace, warn};
use crate::types::TaskId;
use crate::util::{DetRng, panic_message};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Upper bound on how long a joining worker sleeps before looking for more
/// work to help with.
const JOIN_HELP_INTERVAL: Duration = Duration::from_millis(1);

thread_local! {
    static CURRENT_WORKER: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

struct WorkerContext {
    pool_id: usize,
    index: usize,
    local: Worker<Job>,
    rng: DetRng,
}

struct Shared {
    id: usize,
    global: GlobalQueue<Job>,
    stealers: Vec<Stealer<Job>>,
    pending: AtomicUsize,
    live_workers: AtomicUsize,
    shutdown: AtomicBool,
    next_task: AtomicU64,
    external_steals: AtomicU64,
    sleep: Mutex<()>,
    wake: Condvar,
    idle_park: Duration,
}

impl Shared {
    fn is_current_worker(&self) -> bool {
        CURRENT_WORKER.with(|cell| {
            cell.borrow()
                .as_ref()
                .is_some_and(|ctx| ctx.pool_id == self.id)
        })
    }

    fn enqueue(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let leftover = CURRENT_WORKER.with(|cell| {
            let slot = cell.borrow();
            match slot.as_ref() {
                Some(ctx) if ctx.pool_id == self.id => {
                    ctx.local.push(job);
                    None
                }
                _ => Some(job),
            }
        });
        if let Some(job) = leftover {
            self.global.push(job);
        }
        let _guard = self.sleep.lock();
        self.wake.notify_one();
    }

    /// Finds a runnable job: local deque, then global queue, then peers.
    fn find_job(&self) -> Option<Job> {
        let job = CURRENT_WORKER.with(|cell| {
            let mut slot = cell.borrow_mut();
            match slot.as_mut() {
                Some(ctx) if ctx.pool_id == self.id => ctx
                    .local
                    .pop()
                    .or_else(|| self.global.pop())
                    .or_else(|| steal_task(&self.stealers, &mut ctx.rng)),
                _ => self.global.pop().or_else(|| {
                    let seed = self.external_steals.fetch_add(1, Ordering::Relaxed);
                    steal_task(&self.stealers, &mut DetRng::new(seed))
                }),
            }
        });
        if job.is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        job
    }

    fn park(&self) {
        let mut guard = self.sleep.lock();
        if self.pending.load(Ordering::Acquire) == 0 && !self.shutdown.load(Ordering::Acquire) {
            let _ = self.wake.wait_for(&mut guard, self.idle_park);
        }
    }

    fn notify_all(&self) {
        let _guard = self.sleep.lock();
        self.wake.notify_all();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        if let Some(job) = shared.find_job() {
            job();
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) && shared.pending.load(Ordering::Acquire) == 0 {
            break;
        }
        shared.park();
    }
}

/// A cloneable handle for submitting work to a [`WorkerPool`].
///
/// Handles keep the queues alive but not the threads; once the owning
/// [`WorkerPool`] shuts down, spawning from outside the pool resolves to
/// [`JoinError::Shutdown`].
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    /// Submits `f` for execution on the pool.
    ///
    /// Panics inside `f` are caught and reported through the returned
    /// handle as [`JoinError::Panicked`].
    pub fn spawn<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let shared = &self.shared;
        let id = TaskId::from_raw(shared.next_task.fetch_add(1, Ordering::Relaxed));

        // Workers may keep forking while the pool drains after shutdown.
        if shared.shutdown.load(Ordering::Acquire) && !shared.is_current_worker() {
            debug!(task_id = %id, "spawn rejected: pool is shut down");
            return TaskHandle::resolved(id, Err(JoinError::Shutdown));
        }

        let slot = Arc::new(TaskSlot {
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
        });
        let guard = PendingGuard(Arc::clone(&slot));
        let job: Job = Box::new(move || {
            let PendingGuard(job_slot) = &guard;
            {
                let mut state = job_slot.state.lock();
                if !matches!(*state, TaskState::Pending) {
                    trace!(task_id = %id, "skipping cancelled task");
                    return;
                }
                *state = TaskState::Running;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(task_id = %id, message = %message, "pool task panicked");
                JoinError::Panicked(message)
            });
            *job_slot.state.lock() = TaskState::Done(result);
            job_slot.done.notify_all();
        });

        shared.enqueue(job);
        trace!(task_id = %id, "task spawned");
        TaskHandle {
            id,
            slot,
            shared: Some(Arc::clone(shared)),
        }
    }

    /// Returns the number of worker threads the pool was started with.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Returns the number of jobs queued but not yet started.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Returns the index of the current worker if called from one of this
    /// pool's threads.
    #[must_use]
    pub fn current_worker_index(&self) -> Option<usize> {
        CURRENT_WORKER.with(|cell| {
            cell.borrow()
                .as_ref()
                .filter(|ctx| ctx.pool_id == self.shared.id)
                .map(|ctx| ctx.index)
        })
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("id", &self.shared.id)
            .field("workers", &self.shared.stealers.len())
            .field("pending", &self.shared.pending.load(Ordering::Relaxed))
            .field("shutdown", &self.shared.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

/// A fixed-size work-stealing thread pool.
///
/// The pool owns its threads. Dropping it requests shutdown, lets workers
/// drain queued jobs, and joins them.
pub struct WorkerPool {
    handle: PoolHandle,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Starts a pool configured by `config`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a worker thread cannot be spawned. Workers
    /// started before the failure are shut down.
    pub fn new(config: &PoolConfig) -> io::Result<Self> {
        let worker_threads = config.worker_threads.max(1);
        let locals: Vec<Worker<Job>> = (0..worker_threads).map(|_| Worker::new_lifo()).collect();
        let stealers = locals.iter().map(Worker::stealer).collect();

        let shared = Arc::new(Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            global: GlobalQueue::new(),
            stealers,
            pending: AtomicUsize::new(0),
            live_workers: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            next_task: AtomicU64::new(1),
            external_steals: AtomicU64::new(1),
            sleep: Mutex::new(()),
            wake: Condvar::new(),
            idle_park: config.idle_park.max(Duration::from_millis(1)),
        });

        let pool = Self {
            handle: PoolHandle {
                shared: Arc::clone(&shared),
            },
            threads: Mutex::new(Vec::with_capacity(worker_threads)),
        };

        for (index, local) in locals.into_iter().enumerate() {
            let worker_shared = Arc::clone(&shared);
            shared.live_workers.fetch_add(1, Ordering::AcqRel);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .stack_size(config.thread_stack_size)
                .spawn(move || {
                    CURRENT_WORKER.with(|cell| {
                        *cell.borrow_mut() = Some(WorkerContext {
                            pool_id: worker_shared.id,
                            index,
                            local,
                            rng: DetRng::for_worker(index),
                        });
                    });
                    worker_loop(&worker_shared);
                    CURRENT_WORKER.with(|cell| cell.borrow_mut().take());
                    worker_shared.live_workers.fetch_sub(1, Ordering::AcqRel);
                });
            match spawned {
                Ok(handle) => pool.threads.lock().push(handle),
                Err(e) => {
                    shared.live_workers.fetch_sub(1, Ordering::AcqRel);
                    warn!(index, error = %e, "failed to spawn pool worker");
                    return Err(e);
                }
            }
        }

        info!(
            pool_id = shared.id,
            workers = worker_threads,
            prefix = %config.thread_name_prefix,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Starts a pool with `worker_threads` workers and default settings
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a worker thread cannot be spawned.
    pub fn with_threads(worker_threads: usize) -> io::Result<Self> {
        Self::new(&PoolConfig {
            worker_threads,
            ..PoolConfig::default()
        })
    }

    /// Returns a cloneable handle for submitting work.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Submits `f` for execution. See [`PoolHandle::spawn`].
    pub fn spawn<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.handle.spawn(f)
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.handle.worker_count()
    }

    /// Returns the number of worker threads that have not exited.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.handle.shared.live_workers.load(Ordering::Acquire)
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.handle.is_shutdown()
    }

    /// Stops accepting work from outside the pool.
    ///
    /// Queued jobs still run; workers exit once the queues are empty.
    pub fn shutdown(&self) {
        let shared = &self.handle.shared;
        if !shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!(
                pool_id = shared.id,
                pending = shared.pending.load(Ordering::Relaxed),
                "worker pool shutting down"
            );
        }
        shared.notify_all();
    }

    /// Shuts down and waits up to `timeout` for every worker to exit.
    ///
    /// Returns true if all workers exited in time.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let shared = &self.handle.shared;
        let deadline = Instant::now().checked_add(timeout);

        while shared.live_workers.load(Ordering::Acquire) > 0 {
            let remaining = deadline.map_or(Duration::MAX, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                return false;
            }
            shared.notify_all();
            thread::sleep(Duration::from_millis(1).min(remaining));
        }

        let current = thread::current().id();
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        true
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("handle", &self.handle)
            .field("live_workers", &self.live_workers())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        let current = thread::current().id();
        for handle in self.threads.get_mut().drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        // Jobs stranded by a spawn racing shutdown hold a PoolHandle; drop them
        // so the shared state is freed.
        while self.handle.shared.global.pop().is_some() {}
        debug!(pool_id = self.handle.shared.id, "worker pool stopped");
    }
}

enum TaskState<T> {
    Pending,
    Running,
    Done(Result<T, JoinError>),
    Taken,
}

struct TaskSlot<T> {
    state: Mutex<TaskState<T>>,
    done: Condvar,
}

/// Resolves a job's slot to [`JoinError::Shutdown`] if the job is dropped
/// without ever running, so no joiner waits on it forever.
struct PendingGuard<T>(Arc<TaskSlot<T>>);

impl<T> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Done(Err(JoinError::Shutdown));
            drop(state);
            self.0.done.notify_all();
        }
    }
}

fn take_result<T>(state: &mut TaskState<T>) -> Option<Result<T, JoinError>> {
    match std::mem::replace(state, TaskState::Taken) {
        TaskState::Done(result) => Some(result),
        other => {
            *state = other;
            None
        }
    }
}

/// Handle to a job submitted to a [`WorkerPool`].
///
/// Dropping the handle detaches the job; it still runs.
pub struct TaskHandle<T> {
    id: TaskId,
    slot: Arc<TaskSlot<T>>,
    shared: Option<Arc<Shared>>,
}

impl<T> TaskHandle<T> {
    fn resolved(id: TaskId, result: Result<T, JoinError>) -> Self {
        Self {
            id,
            slot: Arc::new(TaskSlot {
                state: Mutex::new(TaskState::Done(result)),
                done: Condvar::new(),
            }),
            shared: None,
        }
    }

    /// Returns the task's ID.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns true once a result is available.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(*self.slot.state.lock(), TaskState::Done(_))
    }

    /// Prevents the job from running if it has not started yet.
    ///
    /// Returns true if the job was stopped; its result becomes
    /// [`JoinError::Cancelled`]. A job that is already running finishes
    /// normally.
    pub fn cancel(&self) -> bool {
        let mut state = self.slot.state.lock();
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Done(Err(JoinError::Cancelled));
            drop(state);
            self.slot.done.notify_all();
            trace!(task_id = %self.id, "task cancelled before start");
            true
        } else {
            false
        }
    }

    /// Waits for the job's result.
    ///
    /// On one of the pool's own worker threads this runs other queued jobs
    /// while waiting, so nested fork-join cannot starve the pool. Other
    /// threads sleep on the result, and only help if every worker has exited.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError`] if the job panicked, was cancelled, or was
    /// rejected by a shut-down pool.
    pub fn join(self) -> Result<T, JoinError> {
        loop {
            if let Some(result) = take_result(&mut self.slot.state.lock()) {
                return result;
            }

            let Some(shared) = self.shared.as_deref() else {
                // Only resolved handles have no pool, and those are Done.
                return Err(JoinError::Cancelled);
            };

            let may_help = shared.is_current_worker()
                || shared.live_workers.load(Ordering::Acquire) == 0;
            if may_help {
                if let Some(job) = shared.find_job() {
                    job();
                    continue;
                }
            }

            let mut state = self.slot.state.lock();
            if let Some(result) = take_result(&mut state) {
                return result;
            }
            let wait = if may_help {
                JOIN_HELP_INTERVAL
            } else {
                shared.idle_park
            };
            let _ = self.slot.done.wait_for(&mut state, wait);
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn runs_spawned_jobs() {
        init_test("runs_spawned_jobs");
        let pool = WorkerPool::with_threads(2).expect("pool");
        let handles: Vec<_> = (0..32u64).map(|i| pool.spawn(move || i * 2)).collect();
        let total: u64 = handles.into_iter().map(|h| h.join().expect("join")).sum();
        crate::assert_with_log!(total == 992, "all results collected", 992, total);
        crate::test_complete!("runs_spawned_jobs");
    }

    #[test]
    fn workers_are_named_from_prefix() {
        init_test("workers_are_named_from_prefix");
        let pool = WorkerPool::new(&PoolConfig {
            worker_threads: 1,
            thread_name_prefix: "calc".to_string(),
            ..PoolConfig::default()
        })
        .expect("pool");
        let name = pool
            .spawn(|| thread::current().name().map(str::to_string))
            .join()
            .expect("join");
        crate::assert_with_log!(
            name.as_deref() == Some("calc-0"),
            "worker name",
            "calc-0",
            name
        );
        crate::test_complete!("workers_are_named_from_prefix");
    }

    #[test]
    fn panic_is_reported_not_propagated() {
        init_test("panic_is_reported_not_propagated");
        let pool = WorkerPool::with_threads(1).expect("pool");
        let result = pool.spawn(|| -> u32 { panic!("leaf exploded") }).join();
        crate::assert_with_log!(
            result == Err(JoinError::Panicked("leaf exploded".to_string())),
            "panic surfaced",
            "Panicked(leaf exploded)",
            result
        );
        let after = pool.spawn(|| 5).join();
        crate::assert_with_log!(
            after == Ok(5),
            "worker survives panic",
            Ok::<i32, JoinError>(5),
            after
        );
        crate::test_complete!("panic_is_reported_not_propagated");
    }

    #[test]
    fn cancel_skips_unstarted_job() {
        init_test("cancel_skips_unstarted_job");
        let pool = WorkerPool::with_threads(1).expect("pool");
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let blocker_gate = Arc::clone(&gate);
        let blocker = pool.spawn(move || {
            let (lock, cvar) = &*blocker_gate;
            let mut open = lock.lock();
            while !*open {
                cvar.wait(&mut open);
            }
        });

        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_job = Arc::clone(&ran);
        let victim = pool.spawn(move || ran_in_job.store(true, Ordering::SeqCst));
        let cancelled = victim.cancel();
        crate::assert_with_log!(cancelled, "queued job cancelled", true, cancelled);

        *gate.0.lock() = true;
        gate.1.notify_all();
        blocker.join().expect("blocker");

        let result = victim.join();
        crate::assert_with_log!(
            result == Err(JoinError::Cancelled),
            "cancelled result",
            "Err(Cancelled)",
            result
        );
        assert!(pool.shutdown_and_wait(Duration::from_secs(5)));
        let ran = ran.load(Ordering::SeqCst);
        crate::assert_with_log!(!ran, "job body never ran", false, ran);
        crate::test_complete!("cancel_skips_unstarted_job");
    }

    #[test]
    fn nested_joins_do_not_starve_single_worker() {
        init_test("nested_joins_do_not_starve_single_worker");
        fn depth_sum(pool: PoolHandle, depth: u32) -> u64 {
            if depth == 0 {
                return 1;
            }
            let inner = pool.clone();
            let right = pool.spawn(move || depth_sum(inner, depth - 1));
            let left = depth_sum(pool, depth - 1);
            left + right.join().expect("nested join")
        }

        let pool = WorkerPool::with_threads(1).expect("pool");
        let handle = pool.handle();

        let total = pool.spawn(move || depth_sum(handle, 8)).join().expect("join");
        crate::assert_with_log!(total == 256, "2^8 leaves", 256, total);
        crate::test_complete!("nested_joins_do_not_starve_single_worker");
    }

    #[test]
    fn work_spreads_across_workers() {
        init_test("work_spreads_across_workers");
        let pool = WorkerPool::with_threads(4).expect("pool");
        let handle = pool.handle();
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let jobs: Vec<_> = (0..64)
            .map(|_| {
                let seen = Arc::clone(&seen);
                let handle = handle.clone();
                pool.spawn(move || {
                    thread::sleep(Duration::from_millis(2));
                    if let Some(index) = handle.current_worker_index() {
                        seen.lock().insert(index);
                    }
                })
            })
            .collect();
        for job in jobs {
            job.join().expect("join");
        }
        let distinct = seen.lock().len();
        crate::assert_with_log!(
            distinct > 1,
            "more than one worker ran jobs",
            ">1",
            distinct
        );
        crate::test_complete!("work_spreads_across_workers");
    }

    #[test]
    fn spawn_after_shutdown_is_rejected() {
        init_test("spawn_after_shutdown_is_rejected");
        let pool = WorkerPool::with_threads(2).expect("pool");
        let drained = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let drained = Arc::clone(&drained);
            drop(pool.spawn(move || {
                drained.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let stopped = pool.shutdown_and_wait(Duration::from_secs(5));
        crate::assert_with_log!(stopped, "workers exited", true, stopped);
        let drained = drained.load(Ordering::SeqCst);
        crate::assert_with_log!(drained == 16, "queued jobs drained", 16, drained);

        let late = pool.spawn(|| 1).join();
        crate::assert_with_log!(
            late == Err(JoinError::Shutdown),
            "late spawn rejected",
            "Err(Shutdown)",
            late
        );
        crate::test_complete!("spawn_after_shutdown_is_rejected");
    }

    #[test]
    fn shutdown_and_wait_accepts_unbounded_duration() {
        init_test("shutdown_and_wait_accepts_unbounded_duration");
        let pool = WorkerPool::with_threads(2).expect("pool");
        let job = pool.spawn(|| {
            thread::sleep(Duration::from_millis(10));
            3
        });
        let stopped = pool.shutdown_and_wait(Duration::MAX);
        crate::assert_with_log!(stopped, "workers exited", true, stopped);
        let result = job.join();
        crate::assert_with_log!(
            result == Ok(3),
            "queued job finished before exit",
            Ok::<i32, JoinError>(3),
            result
        );
        let live = pool.live_workers();
        crate::assert_with_log!(live == 0, "no live workers", 0, live);
        crate::test_complete!("shutdown_and_wait_accepts_unbounded_duration");
    }
}
