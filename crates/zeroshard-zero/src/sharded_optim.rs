//! Sharded Optimizer - Mixed-Precision Updates on fp32 Master Shards
//!
//! `ShardedOptimizer` owns a [`ShardedModel`] and a base update rule. Each
//! parameter shard has an fp32 master copy; the rule only ever touches the
//! master, which is then written back into the compute-precision payload.
//!
//! A step first sums every rank's overflow counter. If any rank saw an
//! inf/nan gradient the whole step is skipped: the loss scale backs off,
//! gradients are dropped and payloads are restored from the masters, so
//! parameters stay bit-identical. Otherwise gradients are unscaled,
//! optionally clipped by global norm, and applied.
//!
//! With `cpu_offload` the masters and optimizer state live on the host. A
//! non-zero `gpu_margin_mem_ratio` lets them borrow that fraction of the
//! device memory the tracer saw unused, for rules that can run on either
//! side.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroshard_core::{Device, Storage};
use zeroshard_distributed::all_reduce_scalar;
use zeroshard_nn::Module;
use zeroshard_optim::{clip_coefficient, DynamicGradScaler, GradScalerState, Optimizer, StatePlacement};
use zeroshard_tensor::Tensor;

use crate::error::{Result, ZeroError};
use crate::sharded_model::ShardedModel;
use crate::sharded_tensor::{Payload, TensorState};

// =============================================================================
// Checkpoint State
// =============================================================================

/// Serializable optimizer wrapper state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShardedOptimizerState {
    /// Loss scaler state.
    pub scaler: GradScalerState,
    /// Steps skipped because of overflow.
    pub overflow_counter: usize,
}

// =============================================================================
// ShardedOptimizer
// =============================================================================

/// Mixed-precision optimizer over a sharded model.
pub struct ShardedOptimizer<M: Module, O: Optimizer> {
    model: ShardedModel<M>,
    optimizer: O,
    scaler: DynamicGradScaler,
    masters: Vec<Storage<f32>>,
    home: Device,
    overflow_counter: usize,
    found_inf: bool,
}

impl<M: Module, O: Optimizer> ShardedOptimizer<M, O> {
    /// Wraps `model` and the base rule `optimizer`.
    ///
    /// Fails when the rule's state placement contradicts `cpu_offload`, or
    /// when a device margin is requested that cannot be honored.
    pub fn new(model: ShardedModel<M>, optimizer: O) -> Result<Self> {
        let config = model.config();
        config.validate()?;

        let name = optimizer.name();
        match (optimizer.placement(), config.cpu_offload) {
            (StatePlacement::Host, false) => {
                return Err(ZeroError::configuration(format!(
                    "{name} keeps its state on the host and requires cpu_offload"
                )))
            }
            (StatePlacement::Device, true) => {
                return Err(ZeroError::configuration(format!(
                    "{name} keeps its state on the device and cannot be used with cpu_offload"
                )))
            }
            _ => {}
        }
        if config.gpu_margin_mem_ratio > 0.0 {
            if !config.use_memory_tracer {
                return Err(ZeroError::configuration(
                    "gpu_margin_mem_ratio requires use_memory_tracer",
                ));
            }
            if optimizer.placement() != StatePlacement::Any {
                return Err(ZeroError::configuration(format!(
                    "gpu_margin_mem_ratio requires a rule that runs on host and device, got {name}"
                )));
            }
        }

        let home = if config.cpu_offload {
            Device::Cpu
        } else {
            model.compute_device()
        };
        let masters = model
            .params()
            .iter()
            .map(|sp| Ok(Storage::from_vec(sp.data().to_f32_vec()?, home)))
            .collect::<Result<Vec<_>>>()?;
        let scaler = config.loss_scale.build();

        info!(
            optimizer = name,
            params = masters.len(),
            master_device = %home,
            initial_scale = scaler.scale(),
            "sharded optimizer ready"
        );
        Ok(Self {
            model,
            optimizer,
            scaler,
            masters,
            home,
            overflow_counter: 0,
            found_inf: false,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the wrapped model.
    pub fn model(&self) -> &ShardedModel<M> {
        &self.model
    }

    /// Returns the wrapped model mutably.
    pub fn model_mut(&mut self) -> &mut ShardedModel<M> {
        &mut self.model
    }

    /// Returns the base rule.
    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Returns the current loss scale.
    pub fn loss_scale(&self) -> f32 {
        self.scaler.scale()
    }

    /// Returns the loss scaler.
    pub fn scaler(&self) -> &DynamicGradScaler {
        &self.scaler
    }

    /// Steps skipped because of overflow so far.
    pub fn overflow_counter(&self) -> usize {
        self.overflow_counter
    }

    /// Returns true when the last step found an overflow.
    pub fn found_inf(&self) -> bool {
        self.found_inf
    }

    /// Returns the fp32 master shard of parameter `index`.
    pub fn master(&self, index: usize) -> Option<Vec<f32>> {
        self.masters.get(index).map(Storage::to_vec)
    }

    /// Returns where the master shard of parameter `index` lives.
    pub fn master_device(&self, index: usize) -> Option<Device> {
        self.masters.get(index).map(Storage::device)
    }

    // =========================================================================
    // Training Driver
    // =========================================================================

    /// Runs the model forward.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.model.forward(input)
    }

    /// Scales the loss gradient by the loss scale and runs backward.
    pub fn backward(&mut self, loss_grad: &Tensor) -> Result<()> {
        let scaled = loss_grad.mul_scalar(self.scaler.scale());
        self.model.backward(&scaled)
    }

    /// Applies one update. Returns false when the step was skipped because
    /// a rank found an overflow.
    pub fn step(&mut self) -> Result<bool> {
        for sp in self.model.params() {
            if sp.param().requires_grad() && sp.saved_grad().is_none() {
                return Err(ZeroError::PreconditionViolation {
                    param: sp.name().to_string(),
                    group: sp.group().ranks().to_vec(),
                });
            }
        }

        let world_group = self.model.world().default_group().clone();
        let total = all_reduce_scalar(self.model.overflow_counter() as f32, &world_group)?;
        self.found_inf = total > 0.0;
        if self.found_inf {
            self.scaler.update(true);
            self.overflow_counter += 1;
            warn!(
                rank = self.model.world().rank(),
                non_finite = total as usize,
                scale = self.scaler.scale(),
                skipped = self.overflow_counter,
                "found inf during step, skipping update"
            );
            self.release_grads();
            self.sync_payloads()?;
            self.model.finish_iteration();
            return Ok(false);
        }

        self.place_masters()?;

        let mut grads = Vec::with_capacity(self.masters.len());
        for sp in self.model.params_mut() {
            let grad = match sp.take_saved_grad() {
                Some(grad) => {
                    let mut values = grad.to_f32_vec()?;
                    self.scaler.unscale_grads(&mut values);
                    Some(values)
                }
                None => None,
            };
            grads.push(grad);
        }

        if let Some(max_norm) = self.model.config().max_grad_norm {
            let norm = self.global_norm(&grads)?;
            let coef = clip_coefficient(norm, max_norm);
            if coef < 1.0 {
                debug!(norm, max_norm, "clipping gradients");
                for g in grads.iter_mut().flatten() {
                    g.iter_mut().for_each(|v| *v *= coef);
                }
            }
        }

        for (key, (master, grad)) in self.masters.iter().zip(&grads).enumerate() {
            let Some(grad) = grad else {
                continue;
            };
            let device = master.device();
            let mut values = master.as_slice_mut();
            self.optimizer.step_shard(key, &mut values, grad, device)?;
        }

        self.sync_payloads()?;
        self.scaler.update(false);
        self.model.finish_iteration();
        Ok(true)
    }

    /// Drops saved gradients and restores any payload they displaced.
    pub fn zero_grad(&mut self) -> Result<()> {
        self.release_grads();
        self.sync_payloads()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn release_grads(&mut self) {
        for sp in self.model.params_mut() {
            sp.take_saved_grad();
            sp.param().set_grad(None);
        }
    }

    /// Writes every master into its compute-precision payload.
    fn sync_payloads(&mut self) -> Result<()> {
        let config = self.model.config();
        let dtype = config.compute_dtype;
        let device = if config.cpu_offload {
            Device::Cpu
        } else {
            self.model.compute_device()
        };
        let masters = &self.masters;
        for (sp, master) in self.model.params_mut().iter_mut().zip(masters) {
            let values = master.to_vec();
            let sharded_at_rest = sp.sharded_at_rest();
            let data = sp.data_mut();
            // Drops the view a forward without backward left referenced.
            if data.state() == TensorState::Compute {
                data.dec_ref()?;
                data.set_sharded(sharded_at_rest);
                sp.param().release_data();
            }
            let data = sp.data_mut();
            if data.is_released() {
                data.reset_payload(Payload::from_f32(&values, dtype, device));
            } else {
                data.assign(&values);
            }
            data.trans_state(TensorState::Hold)?;
        }
        Ok(())
    }

    /// Global gradient norm. Whole parameters are held by every member of
    /// their group, so their share is divided by the group size.
    fn global_norm(&self, grads: &[Option<Vec<f32>>]) -> Result<f32> {
        let mut sq = 0.0f32;
        for (sp, grad) in self.model.params().iter().zip(grads) {
            let Some(grad) = grad else {
                continue;
            };
            let local: f32 = grad.iter().map(|g| g * g).sum();
            sq += if sp.sharded_at_rest() {
                local
            } else {
                local / sp.group().size() as f32
            };
        }
        let total = all_reduce_scalar(sq, self.model.world().default_group())?;
        Ok(total.sqrt())
    }

    /// Moves masters and their state into the spare device margin.
    fn place_masters(&mut self) -> Result<()> {
        let config = self.model.config();
        let ratio = config.gpu_margin_mem_ratio;
        if ratio <= 0.0 || !config.cpu_offload {
            return Ok(());
        }
        let Some(tracer) = self.model.tracer() else {
            return Ok(());
        };
        let margin = tracer.margin(config.budget.device_capacity, ratio);
        let device = self.model.compute_device();

        let mut used = 0;
        let mut on_device = 0;
        for (key, master) in self.masters.iter().enumerate() {
            let numel = master.len();
            let bytes = numel * core::mem::size_of::<f32>() + self.optimizer.state_bytes(numel);
            let target = if used + bytes <= margin {
                used += bytes;
                on_device += 1;
                device
            } else {
                self.home
            };
            if master.device() != target {
                master.relocate(target);
            }
            if self.optimizer.state_device(key).is_some_and(|d| d != target) {
                self.optimizer.move_state(key, numel, target);
            }
        }
        debug!(margin, used, on_device, "placed master shards");
        Ok(())
    }

    // =========================================================================
    // Checkpointing
    // =========================================================================

    /// Returns the wrapper state for checkpointing.
    pub fn state_dict(&self) -> ShardedOptimizerState {
        ShardedOptimizerState {
            scaler: self.scaler.state_dict(),
            overflow_counter: self.overflow_counter,
        }
    }

    /// Loads wrapper state from a checkpoint.
    pub fn load_state_dict(&mut self, state: ShardedOptimizerState) {
        self.scaler.load_state_dict(state.scaler);
        self.overflow_counter = state.overflow_counter;
    }
}

impl<M: Module, O: Optimizer> core::fmt::Debug for ShardedOptimizer<M, O> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShardedOptimizer")
            .field("model", &self.model)
            .field("optimizer", &self.optimizer.name())
            .field("loss_scale", &self.scaler.scale())
            .field("overflow_counter", &self.overflow_counter)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
