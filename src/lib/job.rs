//! # Typed Job Model
//!
//! Work items flowing through the worker pools form a closed set, expressed
//! as one tagged enum instead of function pointers with opaque payloads:
//! block-multiply contributions, plus the two GPU-route lifecycle jobs that
//! must execute on the GPU pool's own thread so the backend context stays
//! bound to it.
//!
//! A pool does not know how to execute work; it hands each dequeued `Job`
//! to the `JobRunner` it was created with. The CPU pool runs a
//! [`CpuRunner`], the GPU pool a `GpuRunner` (see `gpu.rs`), and both
//! dispatch by matching on the job kind.

use std::fmt;
use std::sync::Arc;

use crate::group::TileGroup;
use crate::kernel::{self, KernelStrategy};

/// One block-multiply contribution toward an output tile.
///
/// The job exclusively owns its `a`/`b` block copies until it hands them to
/// a kernel; it shares the [`TileGroup`] with its sibling jobs.
pub struct BlockJob {
    /// Group (output tile) this contribution belongs to.
    pub group_id: usize,
    /// Contributor index within the group; 0 is the leader.
    pub local_id: usize,
    /// Privately owned copy of the A block.
    pub a: Vec<i32>,
    /// Privately owned copy of the B block.
    pub b: Vec<i32>,
    /// Side length of both blocks.
    pub block_size: usize,
    /// Reduction barrier shared with sibling jobs.
    pub group: Arc<TileGroup>,
}

impl fmt::Debug for BlockJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockJob")
            .field("group_id", &self.group_id)
            .field("local_id", &self.local_id)
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl BlockJob {
    /// Whether this job is its group's leader (performs the reduction).
    pub fn is_leader(&self) -> bool {
        self.local_id == 0
    }

    /// Reports the computed partial product to the group and, for the
    /// leader, performs the group's reduction. Consumes the job; the block
    /// copies are freed here, by the worker that executed them.
    pub fn complete(self, partial: Vec<i32>) {
        let leader = self.is_leader();
        let local_id = self.local_id;
        let group = self.group;
        drop((self.a, self.b));

        group.record(local_id, partial);
        if leader {
            group.reduce_and_release();
        }
    }
}

/// The closed set of jobs a worker pool can carry.
#[derive(Debug)]
pub enum Job {
    /// Multiply one block pair and report to its group.
    Block(BlockJob),
    /// Initialize the compute backend on the executing thread.
    BackendSetup,
    /// Tear the compute backend down on the executing thread.
    BackendTeardown,
}

/// Executes dequeued jobs on behalf of a pool's workers.
pub trait JobRunner: Send + Sync {
    /// Runs one job to completion. Jobs never suspend mid-computation.
    fn run(&self, job: Job);
}

/// Runner for the CPU pool: multiplies blocks with the configured kernel
/// strategy. Backend lifecycle jobs never belong on the CPU pool.
#[derive(Debug)]
pub struct CpuRunner {
    strategy: KernelStrategy,
}

impl CpuRunner {
    /// Creates a runner using `strategy` for every block product.
    pub fn new(strategy: KernelStrategy) -> Self {
        Self { strategy }
    }
}

impl JobRunner for CpuRunner {
    fn run(&self, job: Job) {
        match job {
            Job::Block(block) => {
                let partial =
                    kernel::multiply_block(&block.a, &block.b, block.block_size, self.strategy);
                block.complete(partial);
            }
            Job::BackendSetup | Job::BackendTeardown => {
                tracing::warn!("backend lifecycle job routed to the CPU pool; ignoring");
            }
        }
    }
}
