//! Tensor Creation Functions
//!
//! Factory functions for tensors. Random initializers take the generator
//! explicitly so that ranks seeded alike produce identical parameters.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal, Uniform};

use crate::tensor::Tensor;

// =============================================================================
// Constant Initialization
// =============================================================================

/// Creates a tensor filled with zeros.
#[must_use]
pub fn zeros(shape: &[usize]) -> Tensor {
    Tensor::zeros(shape)
}

/// Creates a tensor filled with a specific value.
#[must_use]
pub fn full(shape: &[usize], value: f32) -> Tensor {
    Tensor::full(shape, value)
}

// =============================================================================
// Random Initialization
// =============================================================================

/// Returns a deterministic generator for `seed`.
#[must_use]
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Creates a tensor with values drawn uniformly from `[low, high)`.
pub fn uniform<R: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> Tensor {
    let numel: usize = shape.iter().product();
    let dist = Uniform::new(low, high);
    let data: Vec<f32> = (0..numel).map(|_| dist.sample(rng)).collect();
    Tensor::from_vec(data, shape).unwrap_or_else(|_| Tensor::zeros(shape))
}

/// Creates a tensor with values drawn from `N(0, std^2)`.
pub fn randn<R: Rng + ?Sized>(shape: &[usize], std: f32, rng: &mut R) -> Tensor {
    let numel: usize = shape.iter().product();
    let data: Vec<f32> = (0..numel)
        .map(|_| {
            let z: f32 = StandardNormal.sample(rng);
            z * std
        })
        .collect();
    Tensor::from_vec(data, shape).unwrap_or_else(|_| Tensor::zeros(shape))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_and_full() {
        assert!(zeros(&[2, 3]).to_vec().iter().all(|&v| v == 0.0));
        assert!(full(&[4], 1.5).to_vec().iter().all(|&v| v == 1.5));
    }

    #[test]
    fn test_uniform_range() {
        let mut rng = seeded_rng(0);
        let t = uniform(&[1000], -0.5, 0.5, &mut rng);
        assert!(t.to_vec().iter().all(|&v| (-0.5..0.5).contains(&v)));
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = randn(&[16], 1.0, &mut seeded_rng(42));
        let b = randn(&[16], 1.0, &mut seeded_rng(42));
        let c = randn(&[16], 1.0, &mut seeded_rng(43));
        assert_eq!(a.to_vec(), b.to_vec());
        assert_ne!(a.to_vec(), c.to_vec());
    }
}
