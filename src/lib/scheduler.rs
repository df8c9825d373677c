//! # Block-Partitioning Scheduler
//!
//! Decomposes one `N x N` product into `blocks_per_side^2` output tiles,
//! each the sum of `blocks_per_side` block products, and drives every
//! contribution through the worker pools:
//!
//! 1. For each tile, a [`TileGroup`] is created on the first contribution
//!    and bound to the tile's window of the output buffer.
//! 2. Each contribution becomes a [`BlockJob`] owning private copies of its
//!    A and B blocks.
//! 3. Placement is backpressure-aware: jobs go to the CPU pool first; when
//!    its queue is full, non-leader jobs spill to the GPU route; when both
//!    reject, the scheduler backs off briefly and retries the same job.
//!    Leader jobs are pinned to the CPU pool: a leader performs its
//!    group's reduction wait, which the single-worker GPU route cannot
//!    host without a cross-pool dependency cycle.
//! 4. Termination: once every job is placed, the per-run CPU pool is shut
//!    down gracefully (drain, then join) and the GPU route's queue is
//!    drained without stopping it. Pool drain implies run completion: no
//!    block job finishes without moving its group toward the reduction
//!    that writes the tile.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::group::{OutputTile, TileGroup};
use crate::gpu::GpuExecutor;
use crate::job::{BlockJob, CpuRunner, Job, JobRunner};
use crate::kernel::KernelStrategy;
use crate::matrix::Matrix;
use crate::pool::{PoolError, ShutdownMode, WorkerPool};

/// Pause between placement attempts when both pools reject a job.
const PLACEMENT_BACKOFF: Duration = Duration::from_micros(10);

/// Pause before retrying a failed per-job scratch allocation.
const SCRATCH_STALL: Duration = Duration::from_millis(10);

/// Errors from scheduler construction and runs.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The matrix dimension is zero or not a multiple of the block size.
    #[error("dimension {dimension} is not a positive multiple of block size {block_size}")]
    InvalidDimension {
        /// Offending matrix dimension.
        dimension: usize,
        /// Configured block size.
        block_size: usize,
    },
    /// The two input matrices disagree on dimension.
    #[error("input matrices differ in dimension: {0} vs {1}")]
    DimensionMismatch(usize, usize),
    /// A configuration field is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The output buffer could not be allocated.
    #[error("cannot allocate output buffer: {0}")]
    OutputAllocation(#[from] std::collections::TryReserveError),
    /// A pool lifecycle operation failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Tunables for one scheduler instance.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Side length of one block; the dimension must divide evenly by it.
    pub block_size: usize,
    /// CPU pool worker count. At least 2: a blocked leader must never be
    /// able to starve its own siblings out of the queue.
    pub cpu_threads: usize,
    /// CPU pool queue capacity.
    pub queue_capacity: usize,
    /// Kernel strategy for CPU block products.
    pub strategy: KernelStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cpu_threads = thread::available_parallelism()
            .map(|n| n.get().min(40))
            .unwrap_or(4)
            .max(2);
        Self {
            block_size: 64,
            cpu_threads,
            queue_capacity: cpu_threads,
            strategy: KernelStrategy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the CPU worker count.
    pub fn with_cpu_threads(mut self, cpu_threads: usize) -> Self {
        self.cpu_threads = cpu_threads;
        self
    }

    /// Sets the CPU queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the CPU kernel strategy.
    pub fn with_strategy(mut self, strategy: KernelStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        if self.block_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "block size must be positive".into(),
            ));
        }
        if self.cpu_threads < 2 {
            return Err(SchedulerError::InvalidConfig(
                "CPU pool needs at least 2 workers (leaders block while waiting)".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "queue capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// What one `run` did, for logs, results files and tests.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunStats {
    /// Tile groups created (one per output tile).
    pub groups_created: u64,
    /// Block jobs placed in total.
    pub jobs_dispatched: u64,
    /// Jobs placed on the CPU pool.
    pub cpu_jobs: u64,
    /// Jobs accepted by the GPU route.
    pub gpu_jobs: u64,
    /// Placement attempts that found both pools unavailable.
    pub placement_retries: u64,
}

/// One matrix multiplication in flight: borrowed inputs, owned output.
pub struct Scheduler<'m> {
    a: &'m Matrix,
    b: &'m Matrix,
    dimension: usize,
    config: SchedulerConfig,
    output: Matrix,
    last_stats: RunStats,
}

impl<'m> Scheduler<'m> {
    /// Validates inputs and configuration and allocates the output buffer.
    pub fn new(
        a: &'m Matrix,
        b: &'m Matrix,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        if a.dim() != b.dim() {
            return Err(SchedulerError::DimensionMismatch(a.dim(), b.dim()));
        }
        let dimension = a.dim();
        if dimension == 0 || dimension % config.block_size != 0 {
            return Err(SchedulerError::InvalidDimension {
                dimension,
                block_size: config.block_size,
            });
        }

        let mut data = Vec::new();
        data.try_reserve_exact(dimension * dimension)?;
        data.resize(dimension * dimension, 0);
        let output = Matrix::from_vec(dimension, data).expect("sized output buffer");

        Ok(Self {
            a,
            b,
            dimension,
            config,
            output,
            last_stats: RunStats::default(),
        })
    }

    /// Performs one full multiplication. Synchronous: returns once every
    /// tile group has reduced into the output buffer.
    ///
    /// `gpu` is the optional spill route for non-leader jobs; it is drained
    /// but not stopped, so the same route can serve later runs.
    pub fn run(&mut self, gpu: Option<&GpuExecutor>) -> Result<(), SchedulerError> {
        let block_size = self.config.block_size;
        let blocks_per_side = self.dimension / block_size;
        let mut stats = RunStats::default();

        let cpu_pool = WorkerPool::new(
            self.config.cpu_threads,
            self.config.queue_capacity,
            Arc::new(CpuRunner::new(self.config.strategy)) as Arc<dyn JobRunner>,
        );

        tracing::debug!(
            "run start: dimension {}, {} tiles of {} blocks each",
            self.dimension,
            blocks_per_side * blocks_per_side,
            blocks_per_side
        );

        let out_ptr = self.output.as_mut_slice().as_mut_ptr();

        for tile_row in 0..blocks_per_side {
            for tile_col in 0..blocks_per_side {
                let group_id = tile_row * blocks_per_side + tile_col;
                let offset = tile_row * block_size * self.dimension + tile_col * block_size;
                // SAFETY: tile windows of distinct groups are disjoint by
                // construction, and the output buffer lives in `self`,
                // which outlives both pools' use of the window: every
                // leader is joined with the CPU pool below, and the GPU
                // route is drained before this method returns.
                let window = unsafe { OutputTile::new(out_ptr.add(offset), self.dimension) };
                let group = Arc::new(TileGroup::new(
                    group_id,
                    blocks_per_side,
                    block_size,
                    window,
                ));
                stats.groups_created += 1;

                for k in 0..blocks_per_side {
                    let a_block = copy_block_stalling(self.a, tile_row, k, block_size);
                    let b_block = copy_block_stalling(self.b, k, tile_col, block_size);
                    let job = BlockJob {
                        group_id,
                        local_id: k,
                        a: a_block,
                        b: b_block,
                        block_size,
                        group: Arc::clone(&group),
                    };
                    place(&cpu_pool, gpu, job, &mut stats);
                }
            }
        }

        cpu_pool.shutdown(ShutdownMode::Graceful)?;
        if let Some(gpu) = gpu {
            gpu.wait_until_drained();
        }

        tracing::debug!(
            "run complete: {} groups, {} jobs ({} cpu, {} gpu, {} retries)",
            stats.groups_created,
            stats.jobs_dispatched,
            stats.cpu_jobs,
            stats.gpu_jobs,
            stats.placement_retries
        );
        self.last_stats = stats;
        Ok(())
    }

    /// The product of the most recent completed `run`.
    pub fn output(&self) -> &Matrix {
        &self.output
    }

    /// Consumes the scheduler, keeping only the output matrix.
    pub fn into_output(self) -> Matrix {
        self.output
    }

    /// Matrix dimension this scheduler was built for.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Placement statistics of the most recent `run`.
    pub fn last_run_stats(&self) -> RunStats {
        self.last_stats
    }
}

/// Copies one block, stalling on scratch allocation failure instead of
/// failing the run.
fn copy_block_stalling(m: &Matrix, block_row: usize, block_col: usize, size: usize) -> Vec<i32> {
    loop {
        match m.try_copy_block(block_row, block_col, size) {
            Ok(block) => return block,
            Err(err) => {
                tracing::warn!("stalling for block scratch memory: {}", err);
                thread::sleep(SCRATCH_STALL);
            }
        }
    }
}

/// Places one job: CPU first, GPU spill for non-leaders, bounded backoff
/// and retry when both reject.
fn place(cpu: &WorkerPool, gpu: Option<&GpuExecutor>, job: BlockJob, stats: &mut RunStats) {
    let mut job = job;
    loop {
        job = match cpu.submit(Job::Block(job)) {
            Ok(()) => {
                stats.cpu_jobs += 1;
                stats.jobs_dispatched += 1;
                return;
            }
            Err(err) => match err.into_job() {
                Job::Block(job) => job,
                _ => unreachable!("a block job was submitted"),
            },
        };

        // CPU queue is full. Leaders stay CPU-bound; everything else may
        // spill to the GPU route.
        if !job.is_leader() {
            if let Some(gpu) = gpu {
                job = match gpu.try_submit(job) {
                    Ok(()) => {
                        stats.gpu_jobs += 1;
                        stats.jobs_dispatched += 1;
                        return;
                    }
                    Err(rejection) => rejection.into_job(),
                };
            }
        }

        stats.placement_retries += 1;
        thread::sleep(PLACEMENT_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    fn product_via_scheduler(
        n: usize,
        config: SchedulerConfig,
        gpu: Option<&GpuExecutor>,
    ) -> (Matrix, RunStats) {
        let a = Matrix::random(n, 0xC0FFEE + n as u64);
        let b = Matrix::random(n, 0xBEEF + n as u64);
        let expected = a.multiply_reference(&b);

        let mut sched = Scheduler::new(&a, &b, config).unwrap();
        sched.run(gpu).unwrap();
        assert_eq!(sched.output(), &expected, "scheduled product mismatch");
        let stats = sched.last_run_stats();
        (sched.into_output(), stats)
    }

    #[test]
    fn test_cpu_only_product_matches_reference() {
        let config = SchedulerConfig::default()
            .with_block_size(2)
            .with_cpu_threads(4)
            .with_queue_capacity(4);
        product_via_scheduler(8, config, None);
    }

    #[test]
    fn test_single_tile_matrix() {
        // Dimension equals block size: one group, one contribution.
        let config = SchedulerConfig::default()
            .with_block_size(4)
            .with_cpu_threads(2)
            .with_queue_capacity(2);
        let (_, stats) = product_via_scheduler(4, config, None);
        assert_eq!(stats.groups_created, 1);
        assert_eq!(stats.jobs_dispatched, 1);
    }

    #[test]
    fn test_strassen_strategy_matches_reference() {
        let config = SchedulerConfig::default()
            .with_block_size(4)
            .with_cpu_threads(4)
            .with_queue_capacity(4)
            .with_strategy(KernelStrategy::Strassen);
        product_via_scheduler(16, config, None);
    }

    #[test]
    fn test_gpu_spill_under_backpressure_matches_reference() {
        // A tiny CPU queue forces constant spill to the software route.
        let gpu = GpuExecutor::start(Arc::new(SoftwareBackend::new()), 2);
        let config = SchedulerConfig::default()
            .with_block_size(2)
            .with_cpu_threads(2)
            .with_queue_capacity(1);
        let (_, stats) = product_via_scheduler(16, config, Some(&gpu));
        assert_eq!(stats.jobs_dispatched, stats.cpu_jobs + stats.gpu_jobs);
        gpu.shutdown().unwrap();
    }

    #[test]
    fn test_two_by_two_tile_grid_scenario() {
        // dimension 128, block 64: 2x2 tiles, 2 contributions each.
        let config = SchedulerConfig::default()
            .with_block_size(64)
            .with_cpu_threads(4)
            .with_queue_capacity(4);
        let (_, stats) = product_via_scheduler(128, config, None);
        assert_eq!(stats.groups_created, 4);
        assert_eq!(stats.jobs_dispatched, 8);
    }

    #[test]
    fn test_repeated_runs_reuse_the_scheduler() {
        let a = Matrix::random(8, 5);
        let b = Matrix::random(8, 6);
        let expected = a.multiply_reference(&b);

        let config = SchedulerConfig::default()
            .with_block_size(2)
            .with_cpu_threads(2)
            .with_queue_capacity(2);
        let mut sched = Scheduler::new(&a, &b, config).unwrap();
        for _ in 0..3 {
            sched.run(None).unwrap();
            assert_eq!(sched.output(), &expected);
        }
    }

    #[test]
    fn test_persistent_gpu_route_across_runs() {
        let gpu = GpuExecutor::start(Arc::new(SoftwareBackend::new()), 2);
        let config = SchedulerConfig::default()
            .with_block_size(2)
            .with_cpu_threads(2)
            .with_queue_capacity(1);

        for seed in 0..3u64 {
            let a = Matrix::random(8, 100 + seed);
            let b = Matrix::random(8, 200 + seed);
            let expected = a.multiply_reference(&b);

            let mut sched = Scheduler::new(&a, &b, config).unwrap();
            sched.run(Some(&gpu)).unwrap();
            assert_eq!(sched.output(), &expected);
        }
        assert!(!gpu.is_degraded());
        gpu.shutdown().unwrap();
    }

    #[test]
    fn test_invalid_dimension_is_rejected() {
        let a = Matrix::zeros(6);
        let b = Matrix::zeros(6);
        let config = SchedulerConfig::default().with_block_size(4);
        assert!(matches!(
            Scheduler::new(&a, &b, config),
            Err(SchedulerError::InvalidDimension { dimension: 6, block_size: 4 })
        ));
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        let a = Matrix::zeros(0);
        let b = Matrix::zeros(0);
        assert!(matches!(
            Scheduler::new(&a, &b, SchedulerConfig::default().with_block_size(4)),
            Err(SchedulerError::InvalidDimension { .. })
        ));
    }

    #[test]
    fn test_mismatched_inputs_are_rejected() {
        let a = Matrix::zeros(8);
        let b = Matrix::zeros(4);
        assert!(matches!(
            Scheduler::new(&a, &b, SchedulerConfig::default().with_block_size(4)),
            Err(SchedulerError::DimensionMismatch(8, 4))
        ));
    }

    #[test]
    fn test_single_cpu_worker_is_rejected() {
        let a = Matrix::zeros(8);
        let b = Matrix::zeros(8);
        let config = SchedulerConfig::default()
            .with_block_size(4)
            .with_cpu_threads(1);
        assert!(matches!(
            Scheduler::new(&a, &b, config),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
