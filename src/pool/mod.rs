//! Fixed-size worker pool with FIFO dispatch and a caller-runs overflow
//! policy.
//!
//! # Architecture
//!
//! - N worker threads popping from one bounded queue
//! - Tiered idle strategy: spin → yield → park with timeout
//! - Submission never blocks: when the queue is full the submitting
//!   thread runs the task inline, so forward progress is guaranteed even
//!   if every worker is wedged on slow I/O
//!
//! # Correctness Invariants
//!
//! - **Work-conserving**: every submitted task executes exactly once,
//!   either on a worker or on the submitting thread.
//! - **Panic isolation**: a panicking task is caught and logged; the
//!   worker survives.
//! - **Drain on drop**: dropping the pool stops intake, lets workers
//!   drain the queue, and joins them.
//!
//! No priorities, no cancellation: tasks run to completion.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::sync::{Parker, Unparker};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Pool configuration.
///
/// Defaults are conservative; the daemon sizes `workers` from its
/// `--num-threads` option.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Bounded queue capacity. Submissions beyond this run inline on the
    /// submitting thread (caller-runs).
    pub queue_capacity: usize,

    /// Spin iterations before yielding/parking when idle.
    pub spin_iters: u32,

    /// Park timeout; bounds wakeup latency if an unpark is missed.
    pub park_timeout: Duration,
}

impl PoolConfig {
    /// Configuration for `workers` threads with a proportional queue.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            queue_capacity: workers.saturating_mul(8).max(8),
            ..Self::default()
        }
    }

    /// Validates the configuration. Panics on invalid values; a bad pool
    /// size is a configuration bug, not a runtime condition.
    #[track_caller]
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
        assert!(self.queue_capacity > 0, "queue_capacity must be > 0");
        assert!(
            self.park_timeout > Duration::ZERO,
            "park_timeout must be > 0"
        );
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 64,
            spin_iters: 64,
            park_timeout: Duration::from_millis(10),
        }
    }
}

struct Shared {
    queue: ArrayQueue<Task>,
    shutdown: AtomicBool,
    unparkers: Vec<Unparker>,
}

/// Fixed-size thread pool.
///
/// Dropping the pool drains the queue and joins every worker.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns the worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails validation.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        config.validate();

        let mut parkers = Vec::with_capacity(config.workers);
        let mut unparkers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let parker = Parker::new();
            unparkers.push(parker.unparker().clone());
            parkers.push(parker);
        }

        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(config.queue_capacity),
            shutdown: AtomicBool::new(false),
            unparkers,
        });

        let workers = parkers
            .into_iter()
            .enumerate()
            .map(|(i, parker)| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("statusd-worker-{i}"))
                    .spawn(move || worker_loop(&shared, &parker, &config))
                    .expect("failed to spawn pool worker")
            })
            .collect();

        Self { shared, workers }
    }

    /// Number of worker threads.
    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Submits a task.
    ///
    /// Non-blocking while the queue has room; a submission that finds the
    /// queue full (or the pool shutting down) runs the task on the current
    /// thread before returning.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            run_task(Box::new(task));
            return;
        }
        match self.shared.queue.push(Box::new(task)) {
            Ok(()) => {
                // Unpark everyone: submissions arrive in per-request bursts
                // and a missed wakeup costs a full park timeout of latency.
                for unparker in &self.shared.unparkers {
                    unparker.unpark();
                }
            }
            Err(task) => run_task(task),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for unparker in &self.shared.unparkers {
            unparker.unpark();
        }
        for handle in self.workers.drain(..) {
            // A worker that panicked outside a task already aborted; the
            // join error carries no payload worth logging here.
            let _ = handle.join();
        }
    }
}

fn run_task(task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!("pool task panicked");
    }
}

fn worker_loop(shared: &Shared, parker: &Parker, config: &PoolConfig) {
    loop {
        if let Some(task) = shared.queue.pop() {
            run_task(task);
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            // Shutdown observed with an empty queue; any still-queued task
            // was popped by a sibling.
            return;
        }

        let mut found = false;
        for _ in 0..config.spin_iters {
            if !shared.queue.is_empty() {
                found = true;
                break;
            }
            std::hint::spin_loop();
        }
        if found {
            continue;
        }
        thread::yield_now();
        if shared.queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
            parker.park_timeout(config.park_timeout);
        }
    }
}
