//! Module Trait - Layer Interface
//!
//! Defines the `Module` trait every layer implements. A module caches what it
//! needs during `forward` and accumulates parameter gradients during
//! `backward`, returning the gradient with respect to its input.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use zeroshard_core::Result;
use zeroshard_tensor::Tensor;

use crate::parameter::Parameter;

// =============================================================================
// Module Trait
// =============================================================================

/// Core trait for all layers.
pub trait Module: Send + Sync {
    /// Performs the forward pass.
    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Back-propagates `grad_output` through the last forward pass.
    ///
    /// Parameter gradients are accumulated on the parameters; the gradient
    /// with respect to the input is returned.
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;

    /// Returns all parameters, children included, in a stable order.
    fn parameters(&self) -> Vec<Parameter> {
        Vec::new()
    }

    /// Returns `(qualified name, parameter)` pairs in the same order as
    /// `parameters`.
    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        self.parameters()
            .into_iter()
            .map(|p| (p.name(), p))
            .collect()
    }

    /// Returns the number of learnable elements.
    fn num_parameters(&self) -> usize {
        self.parameters()
            .iter()
            .filter(|p| p.requires_grad())
            .map(Parameter::numel)
            .sum()
    }

    /// Sets the module to training mode.
    fn train(&mut self) {
        self.set_training(true);
    }

    /// Sets the module to evaluation mode.
    fn eval(&mut self) {
        self.set_training(false);
    }

    /// Sets the training mode.
    fn set_training(&mut self, _training: bool) {}

    /// Returns whether the module is in training mode.
    fn is_training(&self) -> bool {
        true
    }

    /// Clears gradients of all parameters.
    fn zero_grad(&self) {
        for param in self.parameters() {
            param.zero_grad();
        }
    }

    /// Returns the module name for debugging.
    fn name(&self) -> &'static str {
        "Module"
    }
}

/// Prefixes the names of a child's parameters with `prefix.`.
pub fn prefixed(prefix: &str, params: Vec<(String, Parameter)>) -> Vec<(String, Parameter)> {
    params
        .into_iter()
        .map(|(name, p)| (format!("{prefix}.{name}"), p))
        .collect()
}
