//! Linear Layer - Fully Connected Layer
//!
//! Applies a linear transformation: y = xW^T + b
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::sync::Arc;

use rand::Rng;
use zeroshard_core::{Error, Result};
use zeroshard_distributed::ExpertParallelInfo;
use zeroshard_tensor::Tensor;

use crate::init::{kaiming_uniform, uniform_range};
use crate::module::Module;
use crate::parameter::Parameter;

// =============================================================================
// Linear
// =============================================================================

/// Applies a linear transformation to a `[batch, in_features]` input.
///
/// # Example
/// ```rust
/// use zeroshard_nn::{Linear, Module};
/// use zeroshard_tensor::{seeded_rng, Tensor};
///
/// let mut linear = Linear::new(4, 3, &mut seeded_rng(0));
/// let out = linear.forward(&Tensor::zeros(&[2, 4])).unwrap();
/// assert_eq!(out.shape(), &[2, 3]);
/// ```
pub struct Linear {
    /// Weight matrix of shape (out_features, in_features).
    pub weight: Parameter,
    /// Bias vector of shape (out_features).
    pub bias: Option<Parameter>,
    in_features: usize,
    out_features: usize,
    input: Option<Tensor>,
}

impl Linear {
    /// Creates a new Linear layer with bias.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        Self::with_bias(in_features, out_features, true, rng)
    }

    /// Creates a new Linear layer with optional bias.
    pub fn with_bias<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        let (weight, bias) = Self::init_weights(in_features, out_features, bias, rng);
        Self::from_weights(weight, bias)
    }

    /// Creates a Linear layer whose parameters belong to an expert.
    pub fn expert<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        info: &Arc<ExpertParallelInfo>,
        rng: &mut R,
    ) -> Self {
        let (weight, bias) = Self::init_weights(in_features, out_features, true, rng);
        Self {
            weight: Parameter::expert("weight", weight, Arc::clone(info)),
            bias: bias.map(|b| Parameter::expert("bias", b, Arc::clone(info))),
            in_features,
            out_features,
            input: None,
        }
    }

    /// Creates a Linear layer from existing weight and bias tensors.
    pub fn from_weights(weight: Tensor, bias: Option<Tensor>) -> Self {
        let out_features = weight.shape()[0];
        let in_features = weight.shape().get(1).copied().unwrap_or(0);
        Self {
            weight: Parameter::named("weight", weight, true),
            bias: bias.map(|b| Parameter::named("bias", b, true)),
            in_features,
            out_features,
            input: None,
        }
    }

    fn init_weights<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> (Tensor, Option<Tensor>) {
        let weight = kaiming_uniform(out_features, in_features, rng);
        let bound = (1.0 / in_features.max(1) as f32).sqrt();
        let bias = bias.then(|| uniform_range(&[out_features], -bound, bound, rng));
        (weight, bias)
    }

    /// Returns the input feature dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Returns the output feature dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for Linear {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() != 2 || input.shape()[1] != self.in_features {
            return Err(Error::shape_mismatch(
                &[input.shape().first().copied().unwrap_or(0), self.in_features],
                input.shape(),
            ));
        }

        // x: (batch, in), W: (out, in) => x @ W^T: (batch, out)
        let weight = self.weight.data()?;
        let mut output = input.matmul(&weight.t()?)?;
        if let Some(bias) = &self.bias {
            output = output.add_row(&bias.data()?)?;
        }
        self.input = Some(input.clone());
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self
            .input
            .take()
            .ok_or_else(|| Error::invalid_operation("Linear::backward called before forward"))?;

        let grad_weight = grad_output.t()?.matmul(&input)?;
        self.weight.accumulate_grad(&grad_weight)?;
        if let Some(bias) = &self.bias {
            bias.accumulate_grad(&grad_output.sum_rows()?)?;
        }

        grad_output.matmul(&self.weight.data()?)
    }

    fn parameters(&self) -> Vec<Parameter> {
        let mut params = vec![self.weight.clone()];
        if let Some(bias) = &self.bias {
            params.push(bias.clone());
        }
        params
    }

    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        let mut params = vec![("weight".to_string(), self.weight.clone())];
        if let Some(bias) = &self.bias {
            params.push(("bias".to_string(), bias.clone()));
        }
        params
    }

    fn name(&self) -> &'static str {
        "Linear"
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("bias", &self.bias.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
