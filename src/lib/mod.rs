//! # Block-Scheduled Matrix Multiplication
//!
//! This crate multiplies large dense integer matrices by partitioning the
//! problem into fixed-size square blocks and distributing block-multiply
//! jobs across two heterogeneous worker pools: a multi-thread CPU pool and
//! a single-thread route to a pluggable compute backend (the GPU path).
//! Partial products are recombined per output tile by a leader-elected
//! reduction barrier.
//!
//! ## Core Modules
//!
//! - `matrix`: dense row-major storage, block copies, reference product.
//! - `kernel`: the block-multiply kernels (naive triple loop, Strassen).
//! - `job`: the typed job model and per-pool job runners.
//! - `pool`: the bounded-queue worker pool with two shutdown disciplines.
//! - `group`: the per-tile reduction barrier.
//! - `backend`: the compute-backend interface the GPU route drives.
//! - `gpu`: the persistent single-worker GPU route.
//! - `scheduler`: decomposition, backpressure-aware placement, termination.
//!
//! ## Shape of a Run
//!
//! ```text
//!     Scheduler                 CPU pool (N workers)
//! +---------------+  submit   +--------------------+
//! |  tile loop    | --------> | [ ][ ][ ][ ][ ]    | --> block kernel --+
//! |  group setup  |  (full?)  +--------------------+                    |
//! |  block copies | --------> +--------------------+                    v
//! +---------------+  spill    | [ ]  GPU route     | --> backend --> TileGroup
//!   non-leaders only          +--------------------+                (leader sums)
//! ```
//!
//! Leader jobs (`local_id == 0`) are never routed to the GPU path: the
//! leader hosts its group's reduction wait, which must not occupy the
//! single GPU worker.

pub mod backend;
pub mod gpu;
pub mod group;
pub mod job;
pub mod kernel;
pub mod matrix;
pub mod pool;
pub mod scheduler;

pub use backend::{BackendError, ComputeBackend, SoftwareBackend};
pub use gpu::{GpuExecutor, GpuRejection, GpuRouteStats};
pub use group::TileGroup;
pub use job::{BlockJob, Job};
pub use kernel::KernelStrategy;
pub use matrix::Matrix;
pub use pool::{PoolError, PoolStats, ShutdownMode, SubmitError, WorkerPool};
pub use scheduler::{RunStats, Scheduler, SchedulerConfig, SchedulerError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
