//! # Block Multiply Kernels
//!
//! The unit of work the scheduler dispatches: the product of two `S x S`
//! integer blocks. Two strategies are available behind one entry point:
//!
//! - **Naive**: the `O(S^3)` triple loop. Default and reference.
//! - **Strassen**: recursive seven-product divide-and-conquer. Only valid
//!   for power-of-two block sizes; any other size silently falls back to
//!   the naive kernel.
//!
//! Strategy selection is an internal algorithm choice, not an observable
//! contract difference: both kernels produce bit-identical integer results.

use serde::{Deserialize, Serialize};

/// Which algorithm a worker uses to multiply a block pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KernelStrategy {
    /// Triple-loop reference kernel.
    #[default]
    Naive,
    /// Strassen divide-and-conquer (power-of-two sizes only).
    Strassen,
}

/// Computes the `n x n` product of two row-major blocks.
pub fn multiply_block(a: &[i32], b: &[i32], n: usize, strategy: KernelStrategy) -> Vec<i32> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * n);

    match strategy {
        KernelStrategy::Naive => naive_multiply(a, b, n),
        KernelStrategy::Strassen if n.is_power_of_two() => strassen_multiply(a, b, n),
        KernelStrategy::Strassen => naive_multiply(a, b, n),
    }
}

/// Triple-loop block product in i-k-j order so the inner loop walks both
/// `b` and the output with stride 1.
fn naive_multiply(a: &[i32], b: &[i32], n: usize) -> Vec<i32> {
    let mut out = vec![0i32; n * n];
    for i in 0..n {
        for k in 0..n {
            let aik = a[i * n + k];
            for j in 0..n {
                out[i * n + j] += aik * b[k * n + j];
            }
        }
    }
    out
}

/// Strassen recursion. `n` must be a power of two.
fn strassen_multiply(a: &[i32], b: &[i32], n: usize) -> Vec<i32> {
    if n == 1 {
        return vec![a[0] * b[0]];
    }

    let h = n / 2;
    let a11 = quadrant(a, n, 0, 0);
    let a12 = quadrant(a, n, 0, h);
    let a21 = quadrant(a, n, h, 0);
    let a22 = quadrant(a, n, h, h);
    let b11 = quadrant(b, n, 0, 0);
    let b12 = quadrant(b, n, 0, h);
    let b21 = quadrant(b, n, h, 0);
    let b22 = quadrant(b, n, h, h);

    let m1 = strassen_multiply(&add(&a11, &a22), &add(&b11, &b22), h);
    let m2 = strassen_multiply(&add(&a21, &a22), &b11, h);
    let m3 = strassen_multiply(&a11, &sub(&b12, &b22), h);
    let m4 = strassen_multiply(&a22, &sub(&b21, &b11), h);
    let m5 = strassen_multiply(&add(&a11, &a12), &b22, h);
    let m6 = strassen_multiply(&sub(&a21, &a11), &add(&b11, &b12), h);
    let m7 = strassen_multiply(&sub(&a12, &a22), &add(&b21, &b22), h);

    let c11 = add(&sub(&add(&m1, &m4), &m5), &m7);
    let c12 = add(&m3, &m5);
    let c21 = add(&m2, &m4);
    let c22 = add(&sub(&add(&m1, &m3), &m2), &m6);

    let mut out = vec![0i32; n * n];
    place_quadrant(&mut out, n, 0, 0, &c11);
    place_quadrant(&mut out, n, 0, h, &c12);
    place_quadrant(&mut out, n, h, 0, &c21);
    place_quadrant(&mut out, n, h, h, &c22);
    out
}

/// Copies the `n/2 x n/2` quadrant of `src` starting at `(row, col)`.
fn quadrant(src: &[i32], n: usize, row: usize, col: usize) -> Vec<i32> {
    let h = n / 2;
    let mut out = Vec::with_capacity(h * h);
    for y in 0..h {
        let start = (row + y) * n + col;
        out.extend_from_slice(&src[start..start + h]);
    }
    out
}

/// Writes an `n/2 x n/2` quadrant into `dst` at `(row, col)`.
fn place_quadrant(dst: &mut [i32], n: usize, row: usize, col: usize, quad: &[i32]) {
    let h = n / 2;
    for y in 0..h {
        let start = (row + y) * n + col;
        dst[start..start + h].copy_from_slice(&quad[y * h..(y + 1) * h]);
    }
}

fn add(a: &[i32], b: &[i32]) -> Vec<i32> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

fn sub(a: &[i32], b: &[i32]) -> Vec<i32> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}
