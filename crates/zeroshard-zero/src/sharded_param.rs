//! Sharded Parameter - A Parameter Plus Its Shard Bookkeeping
//!
//! `ShardedParam` ties a model [`Parameter`] to the compute-precision payload
//! that stands in for its data between uses, the gradient shard saved after
//! backward, and the group it is sharded across.
//!
//! While idle the parameter itself holds no data; the engine installs a
//! gathered view for forward and backward and drops it again afterwards.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use core::fmt;
use std::sync::Arc;

use zeroshard_distributed::{ExpertParallelInfo, ProcessGroup};
use zeroshard_nn::Parameter;

use crate::sharded_tensor::ShardedTensor;

// =============================================================================
// ShardedParam
// =============================================================================

/// A model parameter managed by the sharded engine.
pub struct ShardedParam {
    param: Parameter,
    name: String,
    data: ShardedTensor,
    saved_grad: Option<ShardedTensor>,
    sharded_at_rest: bool,
    is_replicated: bool,
    offload_grad: bool,
    group: ProcessGroup,
}

impl ShardedParam {
    /// Wraps `param` whose payload is `data`, sharded across `group`.
    ///
    /// Dense parameters are replicated over data parallelism; expert
    /// parameters never are.
    pub fn new(param: Parameter, data: ShardedTensor, group: ProcessGroup, offload_grad: bool) -> Self {
        Self {
            name: param.name(),
            is_replicated: !param.is_expert(),
            sharded_at_rest: data.is_sharded(),
            param,
            data,
            saved_grad: None,
            offload_grad,
            group,
        }
    }

    /// Returns the wrapped parameter.
    pub fn param(&self) -> &Parameter {
        &self.param
    }

    /// Returns the qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.param.set_name(self.name.clone());
    }

    /// Returns the logical shape.
    pub fn shape(&self) -> &[usize] {
        self.data.origin_shape()
    }

    /// Returns the logical element count.
    pub fn numel(&self) -> usize {
        self.data.origin_numel()
    }

    /// Returns the compute-precision payload.
    pub fn data(&self) -> &ShardedTensor {
        &self.data
    }

    /// Returns the compute-precision payload mutably.
    pub fn data_mut(&mut self) -> &mut ShardedTensor {
        &mut self.data
    }

    /// Returns true while the payload holds one rank's shard.
    pub fn is_sharded(&self) -> bool {
        self.data.is_sharded()
    }

    /// Returns true when the payload is a shard between uses.
    ///
    /// Unlike [`is_sharded`](Self::is_sharded) this does not change while
    /// the parameter is gathered for compute.
    pub fn sharded_at_rest(&self) -> bool {
        self.sharded_at_rest
    }

    /// Returns true when the parameter is replicated over data parallelism.
    pub fn is_replicated(&self) -> bool {
        self.is_replicated
    }

    /// Returns true when saved gradient shards live on the host.
    pub fn offload_grad(&self) -> bool {
        self.offload_grad
    }

    /// Returns the shard group.
    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    /// Returns the expert layout for expert parameters.
    pub fn moe_info(&self) -> Option<Arc<ExpertParallelInfo>> {
        self.param.moe_info()
    }

    // =========================================================================
    // Gradient Shard
    // =========================================================================

    /// Returns the gradient shard saved by the last backward.
    pub fn saved_grad(&self) -> Option<&ShardedTensor> {
        self.saved_grad.as_ref()
    }

    /// Stores a gradient shard.
    pub fn set_saved_grad(&mut self, grad: ShardedTensor) {
        self.saved_grad = Some(grad);
    }

    /// Removes the gradient shard.
    pub fn take_saved_grad(&mut self) -> Option<ShardedTensor> {
        self.saved_grad.take()
    }
}

impl fmt::Debug for ShardedParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedParam")
            .field("name", &self.name)
            .field("shape", &self.shape())
            .field("is_sharded", &self.is_sharded())
            .field("is_replicated", &self.is_replicated)
            .field("state", &self.data.state())
            .field("device", &self.data.device())
            .field("group", &self.group.ranks())
            .field("has_grad", &self.saved_grad.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use zeroshard_core::{DType, Device};
    use zeroshard_tensor::Tensor;

    #[test]
    fn test_dense_param_is_replicated() {
        let param = Parameter::named("w", Tensor::zeros(&[2, 2]), true);
        let data = ShardedTensor::from_f32(&[0.0; 4], &[2, 2], DType::F16, Device::Cpu).unwrap();
        let mut sp = ShardedParam::new(param, data, ProcessGroup::single(), false);
        assert!(sp.is_replicated());
        assert!(!sp.is_sharded());
        assert_eq!(sp.numel(), 4);
        assert!(sp.saved_grad().is_none());

        let grad = ShardedTensor::from_f32(&[1.0; 4], &[2, 2], DType::F32, Device::Cpu).unwrap();
        sp.set_saved_grad(grad);
        assert!(sp.take_saved_grad().is_some());
        assert!(sp.saved_grad().is_none());
    }

    #[test]
    fn test_rename_reaches_parameter() {
        let param = Parameter::named("weight", Tensor::zeros(&[1]), true);
        let data = ShardedTensor::from_f32(&[0.0], &[1], DType::F32, Device::Cpu).unwrap();
        let mut sp = ShardedParam::new(param.clone(), data, ProcessGroup::single(), true);
        sp.set_name("0.weight");
        assert_eq!(sp.name(), "0.weight");
        assert_eq!(param.name(), "0.weight");
        assert!(sp.offload_grad());
    }
}
