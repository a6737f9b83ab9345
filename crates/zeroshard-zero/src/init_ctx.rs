//! Init Context - Sharding Parameters as They Are Created
//!
//! Inside [`ZeroInitContext::scope`] every [`Parameter`] is intercepted
//! right after construction: it is broadcast from the first rank of its
//! group so replicas start identical, converted to the compute precision,
//! split with the configured strategy, moved to the target device, and its
//! full-size data is dropped. The model built in the scope therefore never
//! holds more than one shard per parameter at rest.
//!
//! Dense parameters are sharded across the whole world. Expert parameters
//! are sharded inside their data-parallel replica group, the ranks holding
//! the same expert.
//!
//! # Example
//! ```rust,ignore
//! let ctx = ZeroInitContext::new(&world, ZeroConfig::default(), Device::Cuda(0))?;
//! let (model, params) = ctx.scope(|| build_model(&mut rng))?;
//! let model = ShardedModel::new(model, params)?;
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info};
use zeroshard_core::Device;
use zeroshard_distributed::{ProcessGroup, World};
use zeroshard_nn::{hooks, Parameter, ParameterHook};

use crate::config::ZeroConfig;
use crate::error::{Result, ZeroError};
use crate::sharded_param::ShardedParam;
use crate::sharded_tensor::ShardedTensor;
use crate::strategy::ShardStrategy;

// =============================================================================
// ShardedParamSet
// =============================================================================

/// Parameters converted by one init scope, in creation order.
#[derive(Debug)]
pub struct ShardedParamSet {
    pub(crate) params: Vec<ShardedParam>,
    pub(crate) world: World,
    pub(crate) config: ZeroConfig,
    pub(crate) device: Device,
}

impl ShardedParamSet {
    /// Returns the converted parameters.
    pub fn params(&self) -> &[ShardedParam] {
        &self.params
    }

    /// Returns how many parameters were converted.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns true when the scope created no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the device the shards were moved to.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Returns the configuration the shards were built with.
    pub fn config(&self) -> &ZeroConfig {
        &self.config
    }
}

// =============================================================================
// ZeroInitContext
// =============================================================================

/// Construction context that shards parameters as they are created.
#[derive(Debug)]
pub struct ZeroInitContext {
    world: World,
    config: ZeroConfig,
    target_device: Device,
}

impl ZeroInitContext {
    /// Creates a context placing shards on `target_device`.
    pub fn new(world: &World, config: ZeroConfig, target_device: Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            world: world.clone(),
            config,
            target_device,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ZeroConfig {
        &self.config
    }

    /// Returns the target device.
    pub fn target_device(&self) -> Device {
        self.target_device
    }

    /// Runs `build` with the sharding hook installed.
    ///
    /// Every rank must run the same `build` so parameters are created, and
    /// therefore broadcast, in the same order. Leaving the scope removes the
    /// hook and nothing else.
    pub fn scope<M>(&self, build: impl FnOnce() -> M) -> Result<(M, ShardedParamSet)> {
        let hook = Rc::new(ShardingHook {
            world: self.world.clone(),
            config: self.config.clone(),
            target_device: self.target_device,
            strategy: self.config.shard_strategy.build(self.config.bucket_size),
            converted: RefCell::new(Vec::new()),
            error: RefCell::new(None),
        });
        let model = hooks::with_hook(Rc::clone(&hook) as Rc<dyn ParameterHook>, build);

        if let Some(err) = hook.error.borrow_mut().take() {
            return Err(err);
        }
        let params = hook.converted.take();
        info!(
            rank = self.world.rank(),
            params = params.len(),
            sharded = params.iter().filter(|p| p.is_sharded()).count(),
            device = %self.target_device,
            "init scope finished"
        );
        Ok((
            model,
            ShardedParamSet {
                params,
                world: self.world.clone(),
                config: self.config.clone(),
                device: self.target_device,
            },
        ))
    }
}

// =============================================================================
// Sharding Hook
// =============================================================================

struct ShardingHook {
    world: World,
    config: ZeroConfig,
    target_device: Device,
    strategy: Box<dyn ShardStrategy>,
    converted: RefCell<Vec<ShardedParam>>,
    error: RefCell<Option<ZeroError>>,
}

impl ShardingHook {
    fn group_for(&self, param: &Parameter) -> ProcessGroup {
        match param.moe_info() {
            Some(info) => info.dp_group.clone(),
            None => self.world.default_group().clone(),
        }
    }

    fn convert(&self, param: &Parameter) -> Result<ShardedParam> {
        let group = self.group_for(param);
        let data = param.data()?;
        let mut values = data.to_vec();
        group.broadcast(&mut values, group.first_rank())?;

        let mut tensor = ShardedTensor::from_f32(
            &values,
            &param.shape(),
            self.config.compute_dtype,
            self.target_device,
        )?;
        if self.config.shard_param && param.numel() >= self.config.replicate_threshold {
            self.strategy.shard(&mut [&mut tensor], &group)?;
        }
        param.release_data();

        debug!(
            name = %param.name(),
            numel = param.numel(),
            shard = tensor.payload_numel(),
            group = ?group.ranks(),
            "sharded parameter"
        );
        Ok(ShardedParam::new(
            param.clone(),
            tensor,
            group,
            self.config.cpu_offload,
        ))
    }
}

impl ParameterHook for ShardingHook {
    fn on_create(&self, param: &Parameter) {
        if self.error.borrow().is_some() {
            return;
        }
        match self.convert(param) {
            Ok(sp) => self.converted.borrow_mut().push(sp),
            Err(err) => *self.error.borrow_mut() = Some(err),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
