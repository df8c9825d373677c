//! # Bounded-Queue Worker Pool
//!
//! A fixed set of worker threads consuming typed jobs from a bounded FIFO
//! queue. The pool is the synchronization workhorse of the scheduler:
//!
//! - `submit` never blocks the producer; a full queue is reported as
//!   [`SubmitError::Full`] with the job handed back, and the caller decides
//!   where the work goes next (backpressure).
//! - Two shutdown disciplines: `Immediate` discards pending jobs and stops
//!   workers as soon as they notice; `Graceful` lets the queue drain first.
//!   A second shutdown request while one is in progress is an error, not a
//!   re-trigger.
//! - `wait_until_drained` parks the caller on a condition variable until
//!   the queue is empty and no job is still executing; it does not stop the
//!   pool.
//!
//! Queue state lives behind one pool-local lock with two condition
//! variables (work available, drained). No cross-pool locking ever occurs;
//! that invariant is what lets the scheduler keep two pools without a
//! lock-order cycle. Lock poisoning means a worker died mid-critical
//! section and the pool's invariants are gone, so it is treated as fatal.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::job::{Job, JobRunner};

/// How a pool stops its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop as soon as workers notice; pending jobs are discarded.
    Immediate,
    /// Drain every pending job, then stop.
    Graceful,
}

/// Errors from pool lifecycle operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// A shutdown was requested while one is already in progress.
    #[error("pool shutdown already in progress")]
    AlreadyStopping,
}

/// Non-fatal submission rejections; each variant returns the job so the
/// caller can re-route it.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The queue is at capacity.
    #[error("pool queue is full")]
    Full(Job),
    /// The pool no longer accepts work.
    #[error("pool is shutting down")]
    ShuttingDown(Job),
}

impl SubmitError {
    /// Takes the rejected job back out of the error.
    pub fn into_job(self) -> Job {
        match self {
            SubmitError::Full(job) | SubmitError::ShuttingDown(job) => job,
        }
    }
}

/// Counters describing a pool's lifetime activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Jobs accepted by `submit`.
    pub submitted: u64,
    /// Jobs executed to completion.
    pub executed: u64,
    /// Submissions rejected with a full queue.
    pub rejected_full: u64,
}

struct PoolState {
    queue: VecDeque<Job>,
    shutdown: Option<ShutdownMode>,
    in_flight: usize,
    stats: PoolStats,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    drained: Condvar,
}

/// Fixed-size worker pool over a bounded job queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    capacity: usize,
    num_threads: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `num_threads` workers consuming from a queue of at most
    /// `capacity` pending jobs, executed through `runner`.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` or `capacity` is zero, or if the OS refuses
    /// to spawn a worker thread (unrecoverable at this layer).
    pub fn new(num_threads: usize, capacity: usize, runner: Arc<dyn JobRunner>) -> Self {
        assert!(num_threads > 0, "pool needs at least one worker");
        assert!(capacity > 0, "pool needs a non-zero queue capacity");

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::with_capacity(capacity),
                shutdown: None,
                in_flight: 0,
                stats: PoolStats::default(),
            }),
            work_available: Condvar::new(),
            drained: Condvar::new(),
        });

        let workers = (0..num_threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                let runner = Arc::clone(&runner);
                thread::Builder::new()
                    .name(format!("pool-worker-{i}"))
                    .spawn(move || worker_loop(shared, runner))
                    .expect("failed to spawn pool worker thread")
            })
            .collect();

        tracing::debug!(
            "started worker pool ({} threads, queue capacity {})",
            num_threads,
            capacity
        );

        Self {
            shared,
            capacity,
            num_threads,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a job at the back of the queue. Never blocks.
    pub fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let mut state = self.shared.state.lock().expect("pool lock poisoned");
        if state.shutdown.is_some() {
            return Err(SubmitError::ShuttingDown(job));
        }
        if state.queue.len() == self.capacity {
            state.stats.rejected_full += 1;
            return Err(SubmitError::Full(job));
        }

        state.queue.push_back(job);
        state.stats.submitted += 1;
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Requests shutdown in the given mode and joins every worker thread.
    ///
    /// Returns [`PoolError::AlreadyStopping`] if a shutdown has already
    /// been requested.
    pub fn shutdown(&self, mode: ShutdownMode) -> Result<(), PoolError> {
        {
            let mut state = self.shared.state.lock().expect("pool lock poisoned");
            if state.shutdown.is_some() {
                return Err(PoolError::AlreadyStopping);
            }
            state.shutdown = Some(mode);

            if mode == ShutdownMode::Immediate {
                let discarded = state.queue.len();
                state.queue.clear();
                if discarded > 0 {
                    tracing::debug!("immediate shutdown discarded {} pending jobs", discarded);
                }
            }

            self.shared.work_available.notify_all();
            if state.queue.is_empty() && state.in_flight == 0 {
                self.shared.drained.notify_all();
            }
        }

        let handles: Vec<_> = {
            let mut workers = self.workers.lock().expect("pool worker list poisoned");
            workers.drain(..).collect()
        };
        for handle in handles {
            handle.join().expect("pool worker thread panicked");
        }

        tracing::debug!("worker pool stopped ({:?})", mode);
        Ok(())
    }

    /// Blocks until the queue is empty and no job is executing. Does not
    /// stop the pool.
    pub fn wait_until_drained(&self) {
        let mut state = self.shared.state.lock().expect("pool lock poisoned");
        while !(state.queue.is_empty() && state.in_flight == 0) {
            state = self
                .shared
                .drained
                .wait(state)
                .expect("pool condvar wait poisoned");
        }
    }

    /// Number of jobs waiting in the queue.
    pub fn pending_jobs(&self) -> usize {
        self.shared.state.lock().expect("pool lock poisoned").queue.len()
    }

    /// Snapshot of the pool's activity counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().expect("pool lock poisoned").stats
    }

    /// Configured worker count.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Configured queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn worker_loop(shared: Arc<PoolShared>, runner: Arc<dyn JobRunner>) {
    loop {
        let job = {
            let mut state = shared.state.lock().expect("pool lock poisoned");
            loop {
                match state.shutdown {
                    Some(ShutdownMode::Immediate) => return,
                    Some(ShutdownMode::Graceful) if state.queue.is_empty() => return,
                    _ => {}
                }
                if let Some(job) = state.queue.pop_front() {
                    state.in_flight += 1;
                    break job;
                }
                state = shared
                    .work_available
                    .wait(state)
                    .expect("pool condvar wait poisoned");
            }
        };

        runner.run(job);

        let mut state = shared.state.lock().expect("pool lock poisoned");
        state.in_flight -= 1;
        state.stats.executed += 1;
        if state.queue.is_empty() && state.in_flight == 0 {
            shared.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Test runner that counts executions and tracks how many jobs run at
    /// the same time. Interprets every job kind as a short sleep.
    struct CountingRunner {
        executed: AtomicUsize,
        running: AtomicUsize,
        high_water: AtomicUsize,
        delay: Duration,
    }

    impl CountingRunner {
        fn new(delay: Duration) -> Self {
            Self {
                executed: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl JobRunner for CountingRunner {
        fn run(&self, _job: Job) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.executed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_submit_reports_full_without_blocking() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(200)));
        let pool = WorkerPool::new(1, 2, Arc::clone(&runner) as Arc<dyn JobRunner>);

        // First job occupies the worker; two more fill the queue.
        pool.submit(Job::BackendSetup).unwrap();
        thread::sleep(Duration::from_millis(50));
        pool.submit(Job::BackendSetup).unwrap();
        pool.submit(Job::BackendSetup).unwrap();

        let start = Instant::now();
        let rejected = pool.submit(Job::BackendSetup);
        assert!(matches!(rejected, Err(SubmitError::Full(_))));
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "submit must not block on a full queue"
        );
        assert_eq!(pool.stats().rejected_full, 1);

        pool.shutdown(ShutdownMode::Graceful).unwrap();
    }

    #[test]
    fn test_graceful_shutdown_drains_every_job_exactly_once() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(1)));
        let pool = WorkerPool::new(4, 64, Arc::clone(&runner) as Arc<dyn JobRunner>);

        let mut accepted = 0;
        for _ in 0..64 {
            if pool.submit(Job::BackendSetup).is_ok() {
                accepted += 1;
            }
        }

        pool.shutdown(ShutdownMode::Graceful).unwrap();
        assert_eq!(runner.executed.load(Ordering::SeqCst), accepted);
        assert_eq!(pool.stats().executed, accepted as u64);
    }

    #[test]
    fn test_immediate_shutdown_may_discard_but_never_reruns() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(20)));
        let pool = WorkerPool::new(1, 32, Arc::clone(&runner) as Arc<dyn JobRunner>);

        for _ in 0..16 {
            pool.submit(Job::BackendSetup).unwrap();
        }
        pool.shutdown(ShutdownMode::Immediate).unwrap();

        let executed = runner.executed.load(Ordering::SeqCst);
        assert!(executed <= 16, "a job ran more than once");
        assert_eq!(pool.pending_jobs(), 0);
    }

    #[test]
    fn test_concurrency_never_exceeds_thread_count() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(10)));
        let pool = WorkerPool::new(3, 32, Arc::clone(&runner) as Arc<dyn JobRunner>);

        for _ in 0..24 {
            while let Err(SubmitError::Full(_)) = pool.submit(Job::BackendSetup) {
                thread::sleep(Duration::from_millis(1));
            }
        }
        pool.shutdown(ShutdownMode::Graceful).unwrap();

        assert!(runner.high_water.load(Ordering::SeqCst) <= 3);
        assert_eq!(runner.executed.load(Ordering::SeqCst), 24);
    }

    #[test]
    fn test_wait_until_drained_without_stopping() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(5)));
        let pool = WorkerPool::new(2, 16, Arc::clone(&runner) as Arc<dyn JobRunner>);

        for _ in 0..8 {
            pool.submit(Job::BackendSetup).unwrap();
        }
        pool.wait_until_drained();
        assert_eq!(runner.executed.load(Ordering::SeqCst), 8);

        // The pool still accepts work after a drain-wait.
        pool.submit(Job::BackendSetup).unwrap();
        pool.wait_until_drained();
        assert_eq!(runner.executed.load(Ordering::SeqCst), 9);

        pool.shutdown(ShutdownMode::Graceful).unwrap();
    }

    #[test]
    fn test_second_shutdown_is_an_error() {
        let runner = Arc::new(CountingRunner::new(Duration::ZERO));
        let pool = WorkerPool::new(1, 4, runner as Arc<dyn JobRunner>);

        pool.shutdown(ShutdownMode::Graceful).unwrap();
        assert_eq!(
            pool.shutdown(ShutdownMode::Immediate),
            Err(PoolError::AlreadyStopping)
        );
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let runner = Arc::new(CountingRunner::new(Duration::ZERO));
        let pool = WorkerPool::new(1, 4, runner as Arc<dyn JobRunner>);

        pool.shutdown(ShutdownMode::Graceful).unwrap();
        assert!(matches!(
            pool.submit(Job::BackendSetup),
            Err(SubmitError::ShuttingDown(_))
        ));
    }
}
