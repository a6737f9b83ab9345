//! Loss Functions - Training Objectives
//!
//! Losses take `(prediction, target)` and return a scalar; `backward`
//! returns the gradient with respect to the prediction.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use zeroshard_core::{Error, Result};
use zeroshard_tensor::Tensor;

// =============================================================================
// Reduction
// =============================================================================

/// How per-element losses are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// Average over all elements.
    #[default]
    Mean,
    /// Sum over all elements.
    Sum,
}

// =============================================================================
// MSELoss
// =============================================================================

/// Mean squared error loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct MSELoss {
    reduction: Reduction,
}

impl MSELoss {
    /// Creates a new MSELoss with default reduction (Mean).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates MSELoss with specified reduction.
    pub fn with_reduction(reduction: Reduction) -> Self {
        Self { reduction }
    }

    /// Computes the loss.
    pub fn compute(&self, input: &Tensor, target: &Tensor) -> Result<f32> {
        let diff = input.sub(target)?;
        let squared = diff.mul(&diff)?;
        match self.reduction {
            Reduction::Mean => squared.mean(),
            Reduction::Sum => Ok(squared.sum()),
        }
    }

    /// Gradient of the loss with respect to `input`.
    pub fn backward(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        if input.is_empty() {
            return Err(Error::EmptyTensor);
        }
        let diff = input.sub(target)?;
        let factor = match self.reduction {
            Reduction::Mean => 2.0 / input.numel() as f32,
            Reduction::Sum => 2.0,
        };
        Ok(diff.mul_scalar(factor))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mse_loss() {
        let input = Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        let target = Tensor::from_vec(vec![1.0, 2.0, 4.0], &[3]).unwrap();
        let loss = MSELoss::new().compute(&input, &target).unwrap();
        assert!((loss - 1.0 / 3.0).abs() < 1e-6);

        let sum = MSELoss::with_reduction(Reduction::Sum)
            .compute(&input, &target)
            .unwrap();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mse_gradient() {
        let input = Tensor::from_vec(vec![2.0, 0.0], &[2]).unwrap();
        let target = Tensor::zeros(&[2]);
        let grad = MSELoss::new().backward(&input, &target).unwrap();
        assert_eq!(grad.to_vec(), vec![2.0, 0.0]);
    }

    #[test]
    fn test_shape_mismatch() {
        let loss = MSELoss::new();
        assert!(loss
            .compute(&Tensor::zeros(&[2]), &Tensor::zeros(&[3]))
            .is_err());
    }
}
