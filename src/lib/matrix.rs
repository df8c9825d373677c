//! # Dense Square Matrix Storage
//!
//! Row-major integer matrices and the block-copy helpers the scheduler uses
//! to carve them into independent units of work. A `Matrix` owns its buffer
//! for the whole run: the scheduler only ever reads the two inputs and
//! writes the output, and worker threads never see the source matrices at
//! all; they receive privately owned block copies instead.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A dense, square, row-major `i32` matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    dim: usize,
    data: Vec<i32>,
}

impl Matrix {
    /// Creates a matrix from an existing row-major buffer.
    ///
    /// Returns `None` when the buffer length is not `dim * dim`.
    pub fn from_vec(dim: usize, data: Vec<i32>) -> Option<Self> {
        if data.len() != dim * dim {
            return None;
        }
        Some(Self { dim, data })
    }

    /// Creates a zero-filled matrix.
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            data: vec![0; dim * dim],
        }
    }

    /// Creates a matrix of uniformly random entries from a seeded generator.
    ///
    /// Entries are drawn from a small range so that products of benchmark-scale
    /// matrices stay within `i32`.
    pub fn random(dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..dim * dim).map(|_| rng.gen_range(-100..=100)).collect();
        Self { dim, data }
    }

    /// Side length of the matrix.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Row-major view of the underlying buffer.
    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    /// Mutable row-major view of the underlying buffer.
    pub fn as_mut_slice(&mut self) -> &mut [i32] {
        &mut self.data
    }

    /// Element at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> i32 {
        self.data[row * self.dim + col]
    }

    /// Copies the `size x size` block whose top-left corner is at
    /// `(block_row * size, block_col * size)` into a freshly owned buffer.
    ///
    /// The copy is deliberate: block jobs migrate across worker threads and
    /// must not alias the source matrix.
    pub fn copy_block(&self, block_row: usize, block_col: usize, size: usize) -> Vec<i32> {
        self.try_copy_block(block_row, block_col, size)
            .expect("block scratch allocation failed")
    }

    /// Fallible variant of [`copy_block`](Self::copy_block): reports scratch
    /// allocation failure instead of aborting, so the scheduler can stall
    /// and retry under memory pressure.
    pub fn try_copy_block(
        &self,
        block_row: usize,
        block_col: usize,
        size: usize,
    ) -> Result<Vec<i32>, std::collections::TryReserveError> {
        debug_assert!((block_row + 1) * size <= self.dim);
        debug_assert!((block_col + 1) * size <= self.dim);

        let mut block = Vec::new();
        block.try_reserve_exact(size * size)?;
        let top = block_row * size;
        let left = block_col * size;
        for y in 0..size {
            let start = (top + y) * self.dim + left;
            block.extend_from_slice(&self.data[start..start + size]);
        }
        Ok(block)
    }

    /// Reference `O(N^3)` product used to verify the scheduled implementation.
    pub fn multiply_reference(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.dim, other.dim, "reference multiply needs equal dims");

        let n = self.dim;
        let mut out = vec![0i32; n * n];
        for i in 0..n {
            for k in 0..n {
                let aik = self.data[i * n + k];
                for j in 0..n {
                    out[i * n + j] += aik * other.data[k * n + j];
                }
            }
        }
        Matrix { dim: n, data: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_rejects_bad_length() {
        assert!(Matrix::from_vec(2, vec![1, 2, 3]).is_none());
        assert!(Matrix::from_vec(2, vec![1, 2, 3, 4]).is_some());
    }

    #[test]
    fn test_copy_block_is_owned_copy() {
        // 4x4 matrix with distinct entries, 2x2 blocks
        let m = Matrix::from_vec(4, (0..16).collect()).unwrap();

        assert_eq!(m.copy_block(0, 0, 2), vec![0, 1, 4, 5]);
        assert_eq!(m.copy_block(0, 1, 2), vec![2, 3, 6, 7]);
        assert_eq!(m.copy_block(1, 0, 2), vec![8, 9, 12, 13]);
        assert_eq!(m.copy_block(1, 1, 2), vec![10, 11, 14, 15]);
    }

    #[test]
    fn test_reference_multiply_identity() {
        let a = Matrix::from_vec(2, vec![1, 2, 3, 4]).unwrap();
        let id = Matrix::from_vec(2, vec![1, 0, 0, 1]).unwrap();
        assert_eq!(a.multiply_reference(&id), a);
    }

    #[test]
    fn test_reference_multiply_known_values() {
        let a = Matrix::from_vec(2, vec![1, 2, 3, 4]).unwrap();
        let b = Matrix::from_vec(2, vec![5, 6, 7, 8]).unwrap();
        let c = a.multiply_reference(&b);
        assert_eq!(c.as_slice(), &[19, 22, 43, 50]);
    }

    #[test]
    fn test_random_is_deterministic_per_seed() {
        let a = Matrix::random(8, 42);
        let b = Matrix::random(8, 42);
        let c = Matrix::random(8, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
