//! Activation Modules - Non-linear Activation Functions
//!
//! Provides activation functions as modules for use in Sequential and other containers.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use zeroshard_core::{Error, Result};
use zeroshard_tensor::Tensor;

use crate::module::Module;

// =============================================================================
// ReLU
// =============================================================================

/// Applies the rectified linear unit function element-wise.
///
/// ReLU(x) = max(0, x)
#[derive(Debug, Clone, Default)]
pub struct ReLU {
    input: Option<Tensor>,
}

impl ReLU {
    /// Creates a new ReLU activation.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for ReLU {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.input = Some(input.clone());
        Ok(input.relu())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self
            .input
            .take()
            .ok_or_else(|| Error::invalid_operation("ReLU::backward called before forward"))?;
        input.relu_backward(grad_output)
    }

    fn name(&self) -> &'static str {
        "ReLU"
    }
}

// =============================================================================
// Tests
// =============================================================================
