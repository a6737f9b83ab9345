//! Parameter - Learnable Parameter Handle
//!
//! A `Parameter` is a shared handle to a named weight, its logical shape, the
//! compute view of its data and its accumulated gradient. Clones share the
//! same state, so the module that owns a parameter and the engine that shards
//! it always agree on what the parameter currently holds.
//!
//! While a parameter is sharded its compute view may be released; the
//! logical shape stays known so the full tensor can be rebuilt on demand.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use zeroshard_core::{Error, Result};
use zeroshard_distributed::ExpertParallelInfo;
use zeroshard_tensor::shape::numel;
use zeroshard_tensor::Tensor;

use crate::hooks;

// =============================================================================
// Parameter
// =============================================================================

/// A learnable parameter of a module.
#[derive(Clone)]
pub struct Parameter {
    inner: Arc<RwLock<ParamInner>>,
}

struct ParamInner {
    name: String,
    shape: Vec<usize>,
    data: Option<Tensor>,
    grad: Option<Tensor>,
    requires_grad: bool,
    moe_info: Option<Arc<ExpertParallelInfo>>,
}

impl Parameter {
    /// Creates an unnamed parameter.
    pub fn new(data: Tensor, requires_grad: bool) -> Self {
        Self::build(String::new(), data, requires_grad, None)
    }

    /// Creates a named parameter.
    pub fn named(name: impl Into<String>, data: Tensor, requires_grad: bool) -> Self {
        Self::build(name.into(), data, requires_grad, None)
    }

    /// Creates a parameter that belongs to an expert.
    ///
    /// The expert layout is attached before creation hooks run, so hooks
    /// can pick the right communication group.
    pub fn expert(name: impl Into<String>, data: Tensor, info: Arc<ExpertParallelInfo>) -> Self {
        Self::build(name.into(), data, true, Some(info))
    }

    fn build(
        name: String,
        data: Tensor,
        requires_grad: bool,
        moe_info: Option<Arc<ExpertParallelInfo>>,
    ) -> Self {
        let param = Self {
            inner: Arc::new(RwLock::new(ParamInner {
                name,
                shape: data.shape().to_vec(),
                data: Some(data),
                grad: None,
                requires_grad,
                moe_info,
            })),
        };
        hooks::dispatch(&param);
        param
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Stable identity of the shared state, usable as a map key.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Returns true when both handles refer to the same parameter.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the parameter name.
    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    /// Renames the parameter.
    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.write().name = name.into();
    }

    /// Returns the logical shape.
    pub fn shape(&self) -> Vec<usize> {
        self.inner.read().shape.clone()
    }

    /// Returns the logical number of elements.
    pub fn numel(&self) -> usize {
        numel(&self.inner.read().shape)
    }

    /// Returns whether gradients are accumulated.
    pub fn requires_grad(&self) -> bool {
        self.inner.read().requires_grad
    }

    /// Sets whether gradients are accumulated.
    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.inner.write().requires_grad = requires_grad;
    }

    /// Returns the expert layout, if this is an expert parameter.
    pub fn moe_info(&self) -> Option<Arc<ExpertParallelInfo>> {
        self.inner.read().moe_info.clone()
    }

    /// Returns true for expert parameters.
    pub fn is_expert(&self) -> bool {
        self.inner.read().moe_info.is_some()
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Returns the compute view, failing if it has been released.
    pub fn data(&self) -> Result<Tensor> {
        self.inner.read().data.clone().ok_or(Error::PayloadReleased)
    }

    /// Returns true while a compute view is attached.
    pub fn has_data(&self) -> bool {
        self.inner.read().data.is_some()
    }

    /// Attaches a compute view of the logical shape.
    pub fn set_data(&self, data: Tensor) -> Result<()> {
        let mut inner = self.inner.write();
        if data.shape() != inner.shape.as_slice() {
            return Err(Error::shape_mismatch(&inner.shape, data.shape()));
        }
        inner.data = Some(data);
        Ok(())
    }

    /// Drops the compute view. The logical shape is kept.
    pub fn release_data(&self) -> Option<Tensor> {
        self.inner.write().data.take()
    }

    // =========================================================================
    // Gradients
    // =========================================================================

    /// Returns the accumulated gradient.
    pub fn grad(&self) -> Option<Tensor> {
        self.inner.read().grad.clone()
    }

    /// Replaces the gradient.
    pub fn set_grad(&self, grad: Option<Tensor>) {
        self.inner.write().grad = grad;
    }

    /// Removes and returns the gradient.
    pub fn take_grad(&self) -> Option<Tensor> {
        self.inner.write().grad.take()
    }

    /// Adds `grad` into the accumulated gradient.
    pub fn accumulate_grad(&self, grad: &Tensor) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.requires_grad {
            return Ok(());
        }
        if grad.shape() != inner.shape.as_slice() {
            return Err(Error::shape_mismatch(&inner.shape, grad.shape()));
        }
        inner.grad = Some(match inner.grad.take() {
            Some(existing) => existing.add(grad)?,
            None => grad.clone_deep(),
        });
        Ok(())
    }

    /// Clears the gradient.
    pub fn zero_grad(&self) {
        self.inner.write().grad = None;
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Parameter")
            .field("name", &inner.name)
            .field("shape", &inner.shape)
            .field("resident", &inner.data.is_some())
            .field("expert", &inner.moe_info.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_creation() {
        let param = Parameter::named("weight", Tensor::zeros(&[2, 3]), true);
        assert_eq!(param.name(), "weight");
        assert_eq!(param.shape(), vec![2, 3]);
        assert_eq!(param.numel(), 6);
        assert!(param.requires_grad());
        assert!(!param.is_expert());
    }

    #[test]
    fn test_clones_share_state() {
        let param = Parameter::new(Tensor::zeros(&[2]), true);
        let other = param.clone();
        other.set_name("bias");
        assert_eq!(param.name(), "bias");
        assert!(param.ptr_eq(&other));
        assert_eq!(param.id(), other.id());
    }

    #[test]
    fn test_release_keeps_shape() {
        let param = Parameter::new(Tensor::full(&[4], 1.0), true);
        assert!(param.release_data().is_some());
        assert!(!param.has_data());
        assert_eq!(param.data().unwrap_err(), Error::PayloadReleased);
        assert_eq!(param.shape(), vec![4]);

        assert!(param.set_data(Tensor::zeros(&[3])).is_err());
        param.set_data(Tensor::zeros(&[4])).unwrap();
        assert!(param.has_data());
    }

    #[test]
    fn test_gradient_accumulation() {
        let param = Parameter::new(Tensor::zeros(&[2]), true);
        let g = Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        param.accumulate_grad(&g).unwrap();
        param.accumulate_grad(&g).unwrap();
        assert_eq!(param.grad().unwrap().to_vec(), vec![2.0, 4.0]);
        // The first accumulation copies, so the source is untouched.
        assert_eq!(g.to_vec(), vec![1.0, 2.0]);

        param.zero_grad();
        assert!(param.grad().is_none());
    }

    #[test]
    fn test_frozen_parameter_ignores_gradients() {
        let param = Parameter::new(Tensor::zeros(&[2]), false);
        param.accumulate_grad(&Tensor::full(&[2], 1.0)).unwrap();
        assert!(param.grad().is_none());
    }
}
