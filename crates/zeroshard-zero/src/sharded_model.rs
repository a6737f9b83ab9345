//! Sharded Model - Gather for Compute, Reduce and Re-shard After
//!
//! `ShardedModel` wraps a [`Module`] whose parameters were created inside a
//! [`ZeroInitContext`](crate::ZeroInitContext) scope. Each parameter moves
//! between two states:
//!
//! - **sharded** (at rest): the payload holds this rank's slice in compute
//!   precision and the parameter itself holds no data,
//! - **gathered** (during compute): the full tensor is installed in the
//!   parameter for forward and backward.
//!
//! After backward every gradient is reduced inside the parameter's group
//! (reduce-scatter for sharded parameters, all-reduce for whole ones, both
//! averaged over the group size), inf/nan elements are counted into the
//! overflow counter, the gradient shard is saved, and the parameter goes
//! back to rest.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::collections::HashMap;

use tracing::{debug, warn};
use zeroshard_core::{DType, Device, MemoryBudget, MemoryUsage};
use zeroshard_distributed::{equal_in_group, ProcessGroup, ReduceOp, World};
use zeroshard_nn::Module;
use zeroshard_tensor::Tensor;

use crate::config::ZeroConfig;
use crate::error::{Result, ZeroError};
use crate::init_ctx::ShardedParamSet;
use crate::mem_tracer::{MemStatsCollector, TraceStage};
use crate::sharded_param::ShardedParam;
use crate::sharded_tensor::{Payload, ShardedTensor, TensorState};
use crate::strategy::commons::{merge_flat, pad_flat};
use crate::strategy::ShardStrategy;

// =============================================================================
// ShardedModel
// =============================================================================

/// A module whose parameters are sharded across ranks between uses.
pub struct ShardedModel<M: Module> {
    module: M,
    params: Vec<ShardedParam>,
    world: World,
    config: ZeroConfig,
    strategy: Box<dyn ShardStrategy>,
    compute_device: Device,
    overflow_counter: usize,
    tracer: Option<MemStatsCollector>,
    budget: MemoryBudget,
    activation_bytes: usize,
}

impl<M: Module> ShardedModel<M> {
    /// Wraps `module`, taking over the parameters converted by its init scope.
    ///
    /// Fails when a parameter of `module` was created outside the scope.
    pub fn new(module: M, set: ShardedParamSet) -> Result<Self> {
        let ShardedParamSet {
            params,
            world,
            config,
            device,
        } = set;

        let mut by_id: HashMap<usize, ShardedParam> =
            params.into_iter().map(|sp| (sp.param().id(), sp)).collect();
        let mut ordered = Vec::with_capacity(by_id.len());
        for (name, param) in module.named_parameters() {
            match by_id.remove(&param.id()) {
                Some(mut sp) => {
                    sp.set_name(name);
                    ordered.push(sp);
                }
                // Shared parameters are listed once.
                None if ordered.iter().any(|sp: &ShardedParam| sp.param().ptr_eq(&param)) => {}
                None => {
                    return Err(ZeroError::configuration(format!(
                        "parameter '{name}' was not created inside an init scope"
                    )))
                }
            }
        }
        if !by_id.is_empty() {
            debug!(unused = by_id.len(), "init scope created parameters the module does not own");
        }

        let tracer = config.use_memory_tracer.then(MemStatsCollector::new);
        Ok(Self {
            module,
            params: ordered,
            strategy: config.shard_strategy.build(config.bucket_size),
            budget: config.budget,
            world,
            config,
            compute_device: device,
            overflow_counter: 0,
            tracer,
            activation_bytes: 0,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the wrapped module.
    pub fn module(&self) -> &M {
        &self.module
    }

    /// Returns the wrapped module mutably.
    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    /// Returns the managed parameters in module order.
    pub fn params(&self) -> &[ShardedParam] {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut [ShardedParam] {
        &mut self.params
    }

    /// Looks a parameter up by qualified name.
    pub fn param(&self, name: &str) -> Option<&ShardedParam> {
        self.params.iter().find(|sp| sp.name() == name)
    }

    /// Returns the world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ZeroConfig {
        &self.config
    }

    /// Returns the device compute runs on.
    pub fn compute_device(&self) -> Device {
        self.compute_device
    }

    /// Returns the shard strategy.
    pub fn strategy(&self) -> &dyn ShardStrategy {
        self.strategy.as_ref()
    }

    /// Returns the memory tracer when enabled.
    pub fn tracer(&self) -> Option<&MemStatsCollector> {
        self.tracer.as_ref()
    }

    /// Non-finite gradient elements counted on this rank since the last step.
    pub fn overflow_counter(&self) -> usize {
        self.overflow_counter
    }

    /// Clears the overflow counter.
    pub fn reset_overflow_counter(&mut self) {
        self.overflow_counter = 0;
    }

    /// Ends the current iteration: the overflow counter is cleared and the
    /// tracer drops its samples, keeping the peaks.
    pub fn finish_iteration(&mut self) {
        self.overflow_counter = 0;
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.next_iteration();
        }
    }

    // =========================================================================
    // Forward
    // =========================================================================

    /// Gathers every parameter, then runs the module forward.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.gather_params()?;
        let output = self.module.forward(input)?;
        self.activation_bytes = (input.numel() + output.numel()) * DType::F32.size_of();
        self.trace(TraceStage::Forward);
        Ok(output)
    }

    fn gather_params(&mut self) -> Result<()> {
        // Host payloads come back before any collective touches them.
        if self.compute_device.is_gpu() {
            for sp in &self.params {
                if sp.data().device().is_cpu() && !sp.data().is_released() {
                    sp.data().relocate(self.compute_device);
                }
            }
        }

        for group in self.groups() {
            let mut tensors: Vec<&mut ShardedTensor> = self
                .params
                .iter_mut()
                .filter(|sp| sp.group().ranks() == group.ranks() && sp.is_sharded())
                .map(ShardedParam::data_mut)
                .collect();
            self.strategy.gather(&mut tensors, &group)?;
        }

        for sp in &mut self.params {
            let view = Tensor::from_vec(sp.data().to_f32_vec()?, sp.shape())?;
            sp.param().set_data(view)?;
            let data = sp.data_mut();
            // The gathered view stays referenced until post-backward.
            if data.state() != TensorState::Compute {
                data.inc_ref();
            }
            data.trans_state(TensorState::Compute)?;
        }
        Ok(())
    }

    /// Distinct shard groups in order of first appearance.
    fn groups(&self) -> Vec<ProcessGroup> {
        let mut groups: Vec<ProcessGroup> = Vec::new();
        for sp in &self.params {
            if !groups.iter().any(|g| g.ranks() == sp.group().ranks()) {
                groups.push(sp.group().clone());
            }
        }
        groups
    }

    // =========================================================================
    // Backward
    // =========================================================================

    /// Runs the module backward, then reduces and re-shards every parameter.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<()> {
        self.backward_compute(grad_output)?;
        self.post_backward()
    }

    /// Runs the module backward only; gradients stay full-size.
    pub fn backward_compute(&mut self, grad_output: &Tensor) -> Result<()> {
        self.module.backward(grad_output)?;
        self.trace(TraceStage::Backward);
        Ok(())
    }

    /// Reduces every gradient into a saved shard and puts parameters to rest.
    pub fn post_backward(&mut self) -> Result<()> {
        for sp in &mut self.params {
            let non_finite = reduce_and_reshard(sp, self.strategy.as_ref(), &self.config)?;
            if non_finite > 0 {
                debug!(name = sp.name(), non_finite, "non-finite gradient elements");
            }
            self.overflow_counter += non_finite;
        }
        self.enforce_budget()
    }

    // =========================================================================
    // Memory
    // =========================================================================

    /// Bytes held by payloads and gradient shards on each side.
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        for sp in &self.params {
            usage.add(sp.data().device(), sp.data().payload_size_bytes());
            if let Some(grad) = sp.saved_grad() {
                usage.add(grad.device(), grad.payload_size_bytes());
            }
        }
        usage
    }

    /// Device bytes of model data, gathered views included.
    fn device_model_bytes(&self) -> usize {
        let views: usize = self
            .params
            .iter()
            .filter(|sp| sp.param().has_data())
            .map(|sp| sp.numel() * DType::F32.size_of())
            .sum();
        self.memory_usage().on(self.compute_device) + views
    }

    fn trace(&mut self, stage: TraceStage) {
        if self.tracer.is_none() {
            return;
        }
        let model_data = self.device_model_bytes();
        let non_model_data = self.activation_bytes;
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.sample(stage, model_data, non_model_data);
        }
    }

    /// Offloads payloads, then gradient shards, until the device fits its
    /// budget.
    fn enforce_budget(&mut self) -> Result<()> {
        let device = self.compute_device;
        let mut usage = self.memory_usage();
        if device.is_cpu() || self.budget.fits(&usage, device, 0) {
            return Ok(usage.check(&self.budget)?);
        }

        let payloads = self.params.iter().map(ShardedParam::data);
        let grads = self.params.iter().filter_map(ShardedParam::saved_grad);
        let mut moved = 0;
        for tensor in payloads.chain(grads) {
            if self.budget.fits(&usage, device, 0) {
                break;
            }
            if tensor.device() == device && !tensor.is_released() {
                let bytes = tensor.payload_size_bytes();
                tensor.relocate(Device::Cpu);
                usage.transfer(device, Device::Cpu, bytes);
                moved += bytes;
            }
        }
        warn!(
            moved,
            device = usage.device,
            capacity = self.budget.device_capacity,
            "device over budget, offloaded shards"
        );
        Ok(usage.check(&self.budget)?)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Rebuilds every full parameter without changing shard state.
    ///
    /// Collective: every rank must call it.
    pub fn gather_full_params(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let mut full = Vec::with_capacity(self.params.len());
        for sp in &self.params {
            let values = sp.data().to_f32_vec()?;
            let values = if sp.is_sharded() {
                let gathered = sp.group().all_gather(&values)?;
                let shards: Vec<Vec<f32>> = gathered
                    .chunks(values.len().max(1))
                    .map(<[f32]>::to_vec)
                    .collect();
                merge_flat(&shards, sp.numel())?
            } else {
                values
            };
            full.push((sp.name().to_string(), values));
        }
        Ok(full)
    }

    /// Returns true when every whole replicated parameter is identical
    /// across its group.
    ///
    /// Collective: every rank must call it.
    pub fn check_replicated_params(&self) -> Result<bool> {
        let mut equal = true;
        for sp in &self.params {
            if sp.is_sharded() || !sp.is_replicated() {
                continue;
            }
            if !equal_in_group(&sp.data().to_f32_vec()?, sp.group())? {
                warn!(name = sp.name(), "replicated parameter differs across ranks");
                equal = false;
            }
        }
        Ok(equal)
    }
}

// =============================================================================
// Post-Backward
// =============================================================================

/// Reduces one gradient, saves its shard and puts the parameter to rest.
///
/// Returns the number of non-finite elements in the saved shard.
fn reduce_and_reshard(
    sp: &mut ShardedParam,
    strategy: &dyn ShardStrategy,
    config: &ZeroConfig,
) -> Result<usize> {
    let param = sp.param().clone();
    let group = sp.group().clone();
    let size = group.size();
    if sp.data().state() == TensorState::Compute {
        sp.data_mut().dec_ref()?;
    }

    // Unused parameters still join the collective.
    let grad = param
        .take_grad()
        .map_or_else(|| vec![0.0; sp.numel()], |g| g.to_vec());

    let mut reduced = if sp.sharded_at_rest() {
        group.reduce_scatter(&pad_flat(&grad, size), ReduceOp::Sum)?
    } else {
        let mut full = grad;
        group.all_reduce(&mut full, ReduceOp::Sum)?;
        full
    };
    let inv = 1.0 / size as f32;
    reduced.iter_mut().for_each(|g| *g *= inv);

    if let Some(previous) = sp.take_saved_grad() {
        for (g, p) in reduced.iter_mut().zip(previous.to_f32_vec()?) {
            *g += p;
        }
    }

    if sp.sharded_at_rest() {
        strategy.shard(&mut [sp.data_mut()], &group)?;
    }
    param.release_data();

    let shape = sp.shape().to_vec();
    let saved = if config.reuse_fp16_shard {
        let payload = sp.data_mut().take_payload()?;
        payload.assign(&reduced);
        ShardedTensor::from_payload(payload, &shape, sp.sharded_at_rest())
    } else {
        sp.data_mut().trans_state(TensorState::HoldAfterBwd)?;
        let payload = Payload::from_f32(&reduced, DType::F32, sp.data().device());
        ShardedTensor::from_payload(payload, &shape, sp.sharded_at_rest())
    };
    if sp.offload_grad() {
        saved.relocate(Device::Cpu);
    }
    if config.cpu_offload && !sp.data().is_released() {
        sp.data().relocate(Device::Cpu);
    }

    let non_finite = saved.to_f32_vec()?.iter().filter(|g| !g.is_finite()).count();
    sp.set_saved_grad(saved);
    Ok(non_finite)
}

impl<M: Module> core::fmt::Debug for ShardedModel<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShardedModel")
            .field("module", &self.module.name())
            .field("params", &self.params.len())
            .field("strategy", &self.strategy.name())
            .field("compute_device", &self.compute_device)
            .field("overflow_counter", &self.overflow_counter)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_ctx::ZeroInitContext;
    use zeroshard_core::memory::DEFAULT_DEVICE_CAPACITY;
    use zeroshard_distributed::{free_port, spawn};
    use zeroshard_nn::{Linear, Parameter};
    use zeroshard_tensor::seeded_rng;

    fn build(world: &World, config: ZeroConfig) -> ShardedModel<Linear> {
        let ctx = ZeroInitContext::new(world, config, Device::Cuda(0)).unwrap();
        let (layer, set) = ctx.scope(|| Linear::new(3, 2, &mut seeded_rng(7))).unwrap();
        ShardedModel::new(layer, set).unwrap()
    }

    fn input() -> Tensor {
        Tensor::from_vec(vec![0.5, -1.0, 2.0, 1.0, 0.0, -0.5], &[2, 3]).unwrap()
    }

    #[test]
    fn test_gathered_view_is_referenced_until_backward() {
        let mut model = build(&World::single(), ZeroConfig::default());
        model.forward(&input()).unwrap();
        model.forward(&input()).unwrap();
        assert!(model.params().iter().all(|sp| sp.data().ref_count() == 1));
        model.backward(&Tensor::full(&[2, 2], 1.0)).unwrap();
        assert!(model.params().iter().all(|sp| sp.data().ref_count() == 0));
    }

    #[test]
    fn test_reshard_rejects_view_still_in_use() {
        let mut model = build(&World::single(), ZeroConfig::default());
        model.forward(&input()).unwrap();
        // A second user keeps the weight's gathered view alive.
        model.params_mut()[0].data_mut().inc_ref();
        let err = model.backward(&Tensor::full(&[2, 2], 1.0)).unwrap_err();
        assert!(matches!(err, ZeroError::ShardState(_)));
    }

    #[test]
    fn test_reuse_rejects_view_still_in_use() {
        let config = ZeroConfig::default().replicate_threshold(100).reuse_fp16_shard(true);
        let mut model = build(&World::single(), config);
        model.forward(&input()).unwrap();
        model.params_mut()[1].data_mut().inc_ref();
        let err = model.backward(&Tensor::full(&[2, 2], 1.0)).unwrap_err();
        assert!(matches!(err, ZeroError::ShardState(_)));
    }

    #[test]
    fn test_forward_gathers_and_backward_reshards() {
        let mut model = build(&World::single(), ZeroConfig::default());
        let out = model.forward(&input()).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        for sp in model.params() {
            assert!(sp.param().has_data());
            assert_eq!(sp.data().state(), TensorState::Compute);
        }

        model.backward(&Tensor::full(&[2, 2], 1.0)).unwrap();
        for sp in model.params() {
            assert!(!sp.param().has_data());
            assert!(sp.is_sharded());
            assert_eq!(sp.data().state(), TensorState::HoldAfterBwd);
            let grad = sp.saved_grad().unwrap();
            assert_eq!(grad.dtype(), DType::F32);
        }
        // d(sum y)/db = batch size
        let bias = model.param("bias").unwrap().saved_grad().unwrap();
        assert_eq!(bias.to_f32_vec().unwrap(), vec![2.0, 2.0]);
        assert_eq!(model.overflow_counter(), 0);
    }

    #[test]
    fn test_reuse_shard_stores_grad_in_payload() {
        let config = ZeroConfig::default().reuse_fp16_shard(true);
        let mut model = build(&World::single(), config);
        model.forward(&input()).unwrap();
        model.backward(&Tensor::full(&[2, 2], 1.0)).unwrap();
        for sp in model.params() {
            assert!(sp.data().is_released());
            assert_eq!(sp.data().state(), TensorState::Free);
            assert_eq!(sp.saved_grad().unwrap().dtype(), DType::F16);
        }
    }

    #[test]
    fn test_injected_inf_is_counted() {
        let mut model = build(&World::single(), ZeroConfig::default());
        model.forward(&input()).unwrap();
        model.backward_compute(&Tensor::full(&[2, 2], 1.0)).unwrap();
        model.params()[0].param().grad().unwrap().fill_(f32::INFINITY);
        model.post_backward().unwrap();
        assert_eq!(model.overflow_counter(), 6);
        model.reset_overflow_counter();
        assert_eq!(model.overflow_counter(), 0);
    }

    #[test]
    fn test_cpu_offload_moves_payloads_and_grads() {
        let config = ZeroConfig::default().cpu_offload(true).use_memory_tracer(true);
        let mut model = build(&World::single(), config);
        model.forward(&input()).unwrap();
        model.backward(&Tensor::full(&[2, 2], 1.0)).unwrap();
        for sp in model.params() {
            assert_eq!(sp.data().device(), Device::Cpu);
            assert_eq!(sp.saved_grad().unwrap().device(), Device::Cpu);
        }
        assert_eq!(model.memory_usage().device, 0);
        let tracer = model.tracer().unwrap();
        assert_eq!(tracer.samples().len(), 2);
        assert!(tracer.peak_model_data() > 0);

        // The next forward brings payloads back first.
        model.forward(&input()).unwrap();
        assert!(model.params().iter().all(|sp| sp.data().device() == Device::Cuda(0)));
    }

    #[test]
    fn test_budget_offloads_when_device_is_full() {
        let budget = MemoryBudget::new(16, DEFAULT_DEVICE_CAPACITY);
        let config = ZeroConfig::default().compute_dtype(DType::F32).budget(budget);
        let mut model = build(&World::single(), config);
        model.forward(&input()).unwrap();
        model.backward(&Tensor::full(&[2, 2], 1.0)).unwrap();
        assert!(model.memory_usage().device <= 16);
    }

    #[test]
    fn test_foreign_parameter_is_rejected() {
        let world = World::single();
        let ctx = ZeroInitContext::new(&world, ZeroConfig::default(), Device::Cpu).unwrap();
        let (_, set) = ctx.scope(|| ()).unwrap();
        let layer = Linear::new(2, 2, &mut seeded_rng(0));
        assert!(matches!(
            ShardedModel::new(layer, set),
            Err(ZeroError::Configuration(_))
        ));
    }

    #[test]
    fn test_two_ranks_average_gradients() {
        let port = free_port().unwrap();
        let results = spawn(2, port, |world| -> Result<(Vec<f32>, bool)> {
            let mut model = build(&world, ZeroConfig::default());
            assert_eq!(model.param("weight").unwrap().data().payload_numel(), 3);
            // Rank r feeds a batch scaled by r + 1.
            let x = input().mul_scalar(world.rank() as f32 + 1.0);
            model.forward(&x)?;
            model.backward(&Tensor::full(&[2, 2], 1.0))?;
            let bias = model.param("bias").unwrap().saved_grad().unwrap().to_f32_vec()?;
            Ok((bias, model.check_replicated_params()?))
        })
        .unwrap();
        // Each rank keeps one element of the averaged bias gradient.
        assert_eq!(results[0].0, vec![2.0]);
        assert_eq!(results[1].0, vec![2.0]);
        assert!(results.iter().all(|(_, equal)| *equal));
    }

    #[test]
    fn test_unused_parameter_gets_zero_grad() {
        let world = World::single();
        let ctx = ZeroInitContext::new(&world, ZeroConfig::default(), Device::Cpu).unwrap();
        let (layer, set) = ctx
            .scope(|| {
                let layer = Linear::new(2, 2, &mut seeded_rng(1));
                let _ = Parameter::named("extra", Tensor::zeros(&[2]), true);
                layer
            })
            .unwrap();
        let mut model = ShardedModel::new(layer, set).unwrap();
        assert_eq!(model.params().len(), 2);
        model.forward(&Tensor::zeros(&[1, 2])).unwrap();
        model.params()[0].param().set_grad(None);
        model.backward_compute(&Tensor::zeros(&[1, 2])).unwrap();
        model.params()[0].param().set_grad(None);
        model.post_backward().unwrap();
        let weight = model.params()[0].saved_grad().unwrap().to_f32_vec().unwrap();
        assert!(weight.iter().all(|g| *g == 0.0));
    }
}
