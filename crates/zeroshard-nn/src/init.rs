//! Weight Initialization - Seeded Initializers
//!
//! Every initializer draws from a caller-provided RNG. Replicated parameters
//! are drawn from an RNG seeded identically on every rank, expert parameters
//! from one seeded per expert, so that a rank can rebuild a reference model
//! bit-for-bit.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use rand::Rng;
use zeroshard_tensor::Tensor;

// =============================================================================
// Basic Initializers
// =============================================================================

/// Creates a tensor filled with zeros.
pub fn zeros(shape: &[usize]) -> Tensor {
    zeroshard_tensor::zeros(shape)
}

/// Creates a tensor filled with a constant value.
pub fn constant(shape: &[usize], value: f32) -> Tensor {
    zeroshard_tensor::full(shape, value)
}

/// Uniform values in `[low, high)`.
pub fn uniform_range<R: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> Tensor {
    zeroshard_tensor::uniform(shape, low, high, rng)
}

// =============================================================================
// Fan-based Initializers
// =============================================================================

/// Xavier uniform initialization for a `[fan_out, fan_in]` weight.
///
/// Samples from U(-a, a) where a = sqrt(6 / (fan_in + fan_out)).
pub fn xavier_uniform<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Tensor {
    let a = (6.0 / (fan_in + fan_out) as f32).sqrt();
    uniform_range(&[fan_out, fan_in], -a, a, rng)
}

/// Kaiming uniform initialization for a `[fan_out, fan_in]` weight.
///
/// Samples from U(-b, b) where b = sqrt(1 / fan_in), the default for
/// linear layers.
pub fn kaiming_uniform<R: Rng + ?Sized>(fan_out: usize, fan_in: usize, rng: &mut R) -> Tensor {
    let bound = (1.0 / fan_in.max(1) as f32).sqrt();
    uniform_range(&[fan_out, fan_in], -bound, bound, rng)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use zeroshard_tensor::seeded_rng;

    #[test]
    fn test_kaiming_bounds() {
        let mut rng = seeded_rng(0);
        let w = kaiming_uniform(8, 4, &mut rng);
        assert_eq!(w.shape(), &[8, 4]);
        assert!(w.to_vec().iter().all(|v| v.abs() <= 0.5));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = xavier_uniform(3, 5, &mut seeded_rng(11));
        let b = xavier_uniform(3, 5, &mut seeded_rng(11));
        let c = xavier_uniform(3, 5, &mut seeded_rng(12));
        assert_eq!(a.to_vec(), b.to_vec());
        assert_ne!(a.to_vec(), c.to_vec());
    }

    #[test]
    fn test_constant() {
        assert_eq!(constant(&[2], 3.0).to_vec(), vec![3.0, 3.0]);
        assert_eq!(zeros(&[3]).sum(), 0.0);
    }
}
