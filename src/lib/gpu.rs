//! # Persistent GPU Route
//!
//! The GPU device is modeled as a serializing consumer: a [`WorkerPool`]
//! with exactly one worker thread drives a [`ComputeBackend`], so no two
//! device calls ever overlap and the backend context stays bound to one
//! thread for its whole life. Backend setup and teardown run as jobs on
//! that same pool for the same reason.
//!
//! The route outlives individual scheduler runs: device setup is expensive,
//! so one `GpuExecutor` is started explicitly, shared across runs, and shut
//! down explicitly at the end of the process. There is no hidden global;
//! callers own the executor and pass it to each run.
//!
//! ## Dependency constraint
//!
//! Leader jobs are rejected at this surface. A leader both produces a
//! partial product and performs its group's reduction wait; parking that
//! wait on the single GPU worker while sibling jobs sit behind it in the
//! same queue would deadlock the route. Leaders run on the CPU pool, where
//! FIFO order plus a second worker guarantees sibling progress.
//!
//! ## Degraded mode
//!
//! Any backend failure (kernel source missing, compilation error, device
//! timeout) flips the route into degraded mode: the failing block job is
//! finished with the CPU kernel so its group still completes, and every
//! later submission is rejected `Unavailable`, letting the scheduler
//! continue CPU-only instead of aborting the process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::backend::ComputeBackend;
use crate::job::{BlockJob, Job, JobRunner};
use crate::kernel::{self, KernelStrategy};
use crate::pool::{PoolError, ShutdownMode, SubmitError, WorkerPool};

/// Why the GPU route did not accept a block job. Every variant returns the
/// job so the caller can place it elsewhere.
#[derive(Error, Debug)]
pub enum GpuRejection {
    /// Leader jobs must not run on the GPU route.
    #[error("leader jobs cannot run on the GPU route")]
    Leader(BlockJob),
    /// The route's queue is at capacity.
    #[error("GPU route queue is full")]
    Busy(BlockJob),
    /// The route is degraded or shutting down.
    #[error("GPU route is unavailable")]
    Unavailable(BlockJob),
}

impl GpuRejection {
    /// Takes the rejected job back out of the rejection.
    pub fn into_job(self) -> BlockJob {
        match self {
            GpuRejection::Leader(job) | GpuRejection::Busy(job) | GpuRejection::Unavailable(job) => {
                job
            }
        }
    }
}

/// Activity counters for the GPU route.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuRouteStats {
    /// Block products computed by the backend.
    pub executed: u64,
    /// Block jobs finished with the CPU fallback after a backend failure.
    pub fallbacks: u64,
}

/// Runner for the GPU pool's single worker.
struct GpuRunner {
    backend: Arc<dyn ComputeBackend>,
    degraded: AtomicBool,
    executed: AtomicU64,
    fallbacks: AtomicU64,
}

impl JobRunner for GpuRunner {
    fn run(&self, job: Job) {
        match job {
            Job::BackendSetup => {
                if let Err(err) = self.backend.setup() {
                    tracing::error!(
                        "backend '{}' setup failed, degrading GPU route: {}",
                        self.backend.name(),
                        err
                    );
                    self.degraded.store(true, Ordering::Release);
                } else {
                    tracing::info!("backend '{}' ready", self.backend.name());
                }
            }
            Job::BackendTeardown => {
                if let Err(err) = self.backend.teardown() {
                    tracing::error!("backend '{}' teardown failed: {}", self.backend.name(), err);
                }
            }
            Job::Block(block) => {
                let partial = match self
                    .backend
                    .multiply_block(&block.a, &block.b, block.block_size)
                {
                    Ok(partial) => {
                        self.executed.fetch_add(1, Ordering::Relaxed);
                        partial
                    }
                    Err(err) => {
                        tracing::error!(
                            "backend '{}' failed on group {} block {}, degrading GPU route: {}",
                            self.backend.name(),
                            block.group_id,
                            block.local_id,
                            err
                        );
                        self.degraded.store(true, Ordering::Release);
                        self.fallbacks.fetch_add(1, Ordering::Relaxed);
                        // Finish the job on the CPU so its group still completes.
                        kernel::multiply_block(
                            &block.a,
                            &block.b,
                            block.block_size,
                            KernelStrategy::Naive,
                        )
                    }
                };
                block.complete(partial);
            }
        }
    }
}

/// Handle to the process-wide GPU route.
pub struct GpuExecutor {
    pool: WorkerPool,
    runner: Arc<GpuRunner>,
}

impl GpuExecutor {
    /// Starts the route: spawns the single-worker pool and enqueues the
    /// backend setup job so the device context binds to the pool thread.
    pub fn start(backend: Arc<dyn ComputeBackend>, queue_capacity: usize) -> Self {
        let runner = Arc::new(GpuRunner {
            backend,
            degraded: AtomicBool::new(false),
            executed: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        });
        let pool = WorkerPool::new(1, queue_capacity, Arc::clone(&runner) as Arc<dyn JobRunner>);
        pool.submit(Job::BackendSetup)
            .expect("fresh GPU queue rejected the setup job");

        Self { pool, runner }
    }

    /// Offers a non-leader block job to the route. Never blocks.
    pub fn try_submit(&self, job: BlockJob) -> Result<(), GpuRejection> {
        if job.is_leader() {
            return Err(GpuRejection::Leader(job));
        }
        if self.runner.degraded.load(Ordering::Acquire) {
            return Err(GpuRejection::Unavailable(job));
        }

        match self.pool.submit(Job::Block(job)) {
            Ok(()) => Ok(()),
            Err(err) => {
                let full = matches!(err, SubmitError::Full(_));
                match err.into_job() {
                    Job::Block(job) if full => Err(GpuRejection::Busy(job)),
                    Job::Block(job) => Err(GpuRejection::Unavailable(job)),
                    _ => unreachable!("a block job was submitted"),
                }
            }
        }
    }

    /// Blocks until the route's queue is empty and no job is executing.
    /// Does not stop the route; it stays usable for later runs.
    pub fn wait_until_drained(&self) {
        self.pool.wait_until_drained();
    }

    /// Whether a backend failure has taken the route out of service.
    pub fn is_degraded(&self) -> bool {
        self.runner.degraded.load(Ordering::Acquire)
    }

    /// Snapshot of the route's activity counters.
    pub fn stats(&self) -> GpuRouteStats {
        GpuRouteStats {
            executed: self.runner.executed.load(Ordering::Relaxed),
            fallbacks: self.runner.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Tears the backend down on its own thread and stops the pool. After
    /// this returns, GPU-routed runs are no longer possible.
    pub fn shutdown(self) -> Result<(), PoolError> {
        self.pool.wait_until_drained();
        if let Err(err) = self.pool.submit(Job::BackendTeardown) {
            // Only possible if the pool was already asked to stop.
            tracing::warn!("could not enqueue backend teardown: {}", err);
        }
        self.pool.shutdown(ShutdownMode::Graceful)
    }
}
