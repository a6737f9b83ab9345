//! zeroshard-zero - Zero-Redundancy Sharded Parameter Engine
//!
//! Every parameter is split across the ranks that would otherwise each hold
//! a full replica. A rank keeps only its shard between uses, gathers the
//! full tensor for compute, reduce-scatters gradients back into shards and
//! updates an fp32 master copy of its shard.
//!
//! # Components
//!
//! - **Strategies** - `TensorShardStrategy`, `BucketTensorShardStrategy`
//! - **ShardedTensor** - payload plus shard metadata and lifecycle state
//! - **ZeroInitContext** - shards parameters as they are created
//! - **ShardedModel** - gather for compute, reduce and re-shard after
//! - **Gradient handlers** - dense and MoE reduction for unsharded models
//! - **ShardedOptimizer** - loss scaling, overflow skip, CPU offload
//!
//! # Example
//!
//! ```rust
//! use zeroshard_core::Device;
//! use zeroshard_distributed::World;
//! use zeroshard_nn::Linear;
//! use zeroshard_optim::HybridAdam;
//! use zeroshard_tensor::{seeded_rng, Tensor};
//! use zeroshard_zero::prelude::*;
//!
//! let world = World::single();
//! let ctx = ZeroInitContext::new(&world, ZeroConfig::default(), Device::Cuda(0)).unwrap();
//! let (layer, params) = ctx.scope(|| Linear::new(4, 2, &mut seeded_rng(0))).unwrap();
//! let model = ShardedModel::new(layer, params).unwrap();
//! let mut optim = ShardedOptimizer::new(model, HybridAdam::new(1e-3)).unwrap();
//!
//! let y = optim.forward(&Tensor::full(&[2, 4], 1.0)).unwrap();
//! optim.backward(&Tensor::full(y.shape(), 0.5)).unwrap();
//! assert!(optim.step().unwrap());
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::float_cmp)]

pub mod check;
pub mod config;
pub mod error;
pub mod gradient_handler;
pub mod init_ctx;
pub mod mem_tracer;
pub mod sharded_model;
pub mod sharded_optim;
pub mod sharded_param;
pub mod sharded_tensor;
pub mod strategy;

// =============================================================================
// Re-exports
// =============================================================================

pub use check::{compare_with_reference, sync_reference, ParamMismatch};
pub use config::{LossScaleConfig, Tolerance, ZeroConfig};
pub use error::{Result, ZeroError};
pub use gradient_handler::{DataParallelGradientHandler, GradientHandler, MoeGradientHandler};
pub use init_ctx::{ShardedParamSet, ZeroInitContext};
pub use mem_tracer::{MemSample, MemStatsCollector, TraceStage};
pub use sharded_model::ShardedModel;
pub use sharded_optim::{ShardedOptimizer, ShardedOptimizerState};
pub use sharded_param::ShardedParam;
pub use sharded_tensor::{Payload, ShardedTensor, TensorState};
pub use strategy::{
    BucketTensorShardStrategy, ShardStrategy, ShardStrategyKind, TensorShardStrategy,
};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for sharded training.
pub mod prelude {
    pub use crate::{
        GradientHandler, MoeGradientHandler, ShardStrategy, ShardStrategyKind, ShardedModel,
        ShardedOptimizer, ShardedParam, ShardedTensor, ZeroConfig, ZeroError, ZeroInitContext,
    };
}
