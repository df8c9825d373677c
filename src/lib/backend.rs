//! # Compute Backend Interface
//!
//! The GPU route consumes hardware acceleration through one narrow trait:
//! set a device context up once, compute block products synchronously, tear
//! the context down. Everything device-specific (context creation, kernel
//! compilation, buffer upload, dispatch, readback) lives behind this
//! boundary and is not this crate's concern.
//!
//! `setup` loads and compiles an external kernel source artifact (the
//! implementation knows its own name or path), `multiply_block` dispatches
//! one block product and blocks until the device finishes or an internal
//! timeout expires, `teardown` releases the context. Backends are driven
//! from a single thread (the GPU
//! pool has exactly one worker), so implementations may bind thread-local
//! device contexts in `setup`.

use std::fmt::Debug;
use std::io;

use thiserror::Error;

/// Failures surfaced by a compute backend.
///
/// Any of these degrades the GPU route (see `gpu.rs`); none of them is
/// retried silently.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The kernel source artifact could not be read.
    #[error("cannot read kernel source: {0}")]
    KernelSource(#[from] io::Error),
    /// The kernel source failed to compile or link.
    #[error("kernel compilation failed: {0}")]
    Compile(String),
    /// Device execution exceeded the backend's internal timeout.
    #[error("device execution timed out")]
    Timeout,
    /// Any other device or context failure.
    #[error("device error: {0}")]
    Device(String),
}

/// A pluggable block-product compute device.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Short name for logs (e.g. "software", "gl-compute").
    fn name(&self) -> &str;

    /// One-time context and kernel initialization. Idempotent per process;
    /// called on the GPU pool's worker thread before any block product.
    fn setup(&self) -> Result<(), BackendError>;

    /// Computes the `n x n` product of two row-major blocks. Synchronous:
    /// returns only once the device has finished (or timed out).
    fn multiply_block(&self, a: &[i32], b: &[i32], n: usize) -> Result<Vec<i32>, BackendError>;

    /// Releases the device context. Called on the GPU pool's worker thread
    /// during route shutdown.
    fn teardown(&self) -> Result<(), BackendError>;
}

/// Deterministic in-process backend.
///
/// Computes block products on the executing thread with the triple loop, so
/// the whole GPU routing path (single-worker pool, setup/teardown jobs,
/// leader rejection, drain-wait) is exercisable on machines without a
/// device.
#[derive(Debug, Default)]
pub struct SoftwareBackend;

impl SoftwareBackend {
    /// Creates the software backend.
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn setup(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn multiply_block(&self, a: &[i32], b: &[i32], n: usize) -> Result<Vec<i32>, BackendError> {
        if a.len() != n * n || b.len() != n * n {
            return Err(BackendError::Device(format!(
                "block length mismatch: expected {}, got {}/{}",
                n * n,
                a.len(),
                b.len()
            )));
        }

        let mut out = vec![0i32; n * n];
        for i in 0..n {
            for k in 0..n {
                let aik = a[i * n + k];
                for j in 0..n {
                    out[i * n + j] += aik * b[k * n + j];
                }
            }
        }
        Ok(out)
    }

    fn teardown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
