//! Tensor Operations - Slice Kernels
//!
//! Host kernels over flat `f32` slices. `Tensor` methods are thin wrappers
//! around these; the sharded optimizer also calls them directly on shard
//! buffers, where no tensor exists.
//!
//! # Categories
//!
//! ## Linear Algebra
//! - `matmul` - Row-major matrix product
//! - `transpose` - Row-major 2-D transpose
//!
//! ## Activation Functions
//! - `relu`, `relu_backward` - Rectifier and its gradient mask
//! - `softmax_rows` - Row-wise numerically stable softmax
//!
//! ## Reductions
//! - `sum`, `sq_norm` - Plain and squared-L2 reductions
//! - `count_non_finite` - Number of inf/nan elements
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

// =============================================================================
// Linear Algebra
// =============================================================================

/// Computes `c = a @ b` for row-major `a: [m, k]` and `b: [k, n]`.
pub fn matmul(c: &mut [f32], a: &[f32], b: &[f32], m: usize, n: usize, k: usize) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(c.len(), m * n);

    c.fill(0.0);
    for i in 0..m {
        for p in 0..k {
            let a_ip = a[i * k + p];
            if a_ip == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            let c_row = &mut c[i * n..(i + 1) * n];
            for (c_ij, &b_pj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_ip * b_pj;
            }
        }
    }
}

/// Writes the transpose of row-major `src: [rows, cols]` into `dst`.
pub fn transpose(dst: &mut [f32], src: &[f32], rows: usize, cols: usize) {
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}

// =============================================================================
// Activation Functions
// =============================================================================

/// Applies `ReLU` activation: max(0, x).
pub fn relu(dst: &mut [f32], src: &[f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = s.max(0.0);
    }
}

/// Passes `grad` through where `input > 0`, zero elsewhere.
pub fn relu_backward(dst: &mut [f32], grad: &[f32], input: &[f32]) {
    for ((d, &g), &x) in dst.iter_mut().zip(grad).zip(input) {
        *d = if x > 0.0 { g } else { 0.0 };
    }
}

/// Row-wise softmax over a `[rows, cols]` buffer.
pub fn softmax_rows(dst: &mut [f32], src: &[f32], cols: usize) {
    for (d_row, s_row) in dst.chunks_mut(cols).zip(src.chunks(cols)) {
        let max = s_row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut total = 0.0;
        for (d, &s) in d_row.iter_mut().zip(s_row) {
            *d = (s - max).exp();
            total += *d;
        }
        for d in d_row.iter_mut() {
            *d /= total;
        }
    }
}

// =============================================================================
// Elementwise
// =============================================================================

/// Computes `y += alpha * x`.
pub fn axpy(y: &mut [f32], alpha: f32, x: &[f32]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// Multiplies every element by `alpha`.
pub fn scale(x: &mut [f32], alpha: f32) {
    for v in x.iter_mut() {
        *v *= alpha;
    }
}

// =============================================================================
// Reductions
// =============================================================================

/// Sum of all elements.
#[must_use]
pub fn sum(x: &[f32]) -> f32 {
    x.iter().sum()
}

/// Squared L2 norm.
#[must_use]
pub fn sq_norm(x: &[f32]) -> f32 {
    x.iter().map(|v| v * v).sum()
}

/// Number of infinite or NaN elements.
#[must_use]
pub fn count_non_finite(x: &[f32]) -> usize {
    x.iter().filter(|v| !v.is_finite()).count()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0; 4];
        matmul(&mut c, &a, &b, 2, 2, 2);
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_transpose() {
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut dst = [0.0; 6];
        transpose(&mut dst, &src, 2, 3);
        assert_eq!(dst, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let src = [1.0, 2.0, 3.0, 1000.0, 1000.0, 1000.0];
        let mut dst = [0.0; 6];
        softmax_rows(&mut dst, &src, 3);
        assert!((dst[..3].iter().sum::<f32>() - 1.0).abs() < 1e-6);
        for &p in &dst[3..] {
            assert!((p - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_relu_backward() {
        let mut dst = [0.0; 3];
        relu_backward(&mut dst, &[1.0, 2.0, 3.0], &[-1.0, 0.0, 4.0]);
        assert_eq!(dst, [0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_count_non_finite() {
        assert_eq!(count_non_finite(&[1.0, f32::INFINITY, f32::NAN, 0.0]), 2);
        assert_eq!(sq_norm(&[3.0, 4.0]), 25.0);
    }
}
