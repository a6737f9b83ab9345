//! # zeroshard - Zero-Redundancy Sharded Training
//!
//! zeroshard trains a model across many ranks without every rank holding a
//! full copy of the parameters, gradients and optimizer state. Each rank
//! keeps one shard, gathers full parameters only while computing, and
//! updates an fp32 master copy of its shard.
//!
//! ## Features
//!
//! - **Sharding strategies**: per-tensor or bucketed all-gather
//! - **Init context**: parameters are sharded the moment they are created
//! - **Mixed precision**: fp16 compute payloads with dynamic loss scaling
//! - **Overflow handling**: a step with inf/nan gradients on any rank is
//!   skipped and parameters stay bit-identical
//! - **CPU offload**: payloads, gradient shards, masters and optimizer state
//!   rest on the host, with an optional device margin for master shards
//! - **Mixture of experts**: experts are spread over ranks and sharded inside
//!   their replica group
//! - **Local backend**: one thread per rank with real collectives, for tests
//!   and single-machine runs
//!
//! # Quick Start
//!
//! ```rust
//! use zeroshard::prelude::*;
//!
//! let world = World::single();
//! let ctx = ZeroInitContext::new(&world, ZeroConfig::default(), Device::Cuda(0)).unwrap();
//! let (layer, params) = ctx.scope(|| Linear::new(4, 2, &mut seeded_rng(0))).unwrap();
//! let model = ShardedModel::new(layer, params).unwrap();
//! let optim = ShardedOptimizer::new(model, HybridAdam::new(1e-3)).unwrap();
//!
//! let mut trainer = Trainer::new(optim, TrainingConfig::new());
//! let x = Tensor::full(&[2, 4], 1.0);
//! let y = Tensor::zeros(&[2, 2]);
//! let report = trainer.train_step(&x, &y).unwrap();
//! assert!(report.applied);
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
#![allow(clippy::return_self_not_must_use)]

// =============================================================================
// Crate Re-exports
// =============================================================================

pub use zeroshard_core as core;
pub use zeroshard_distributed as distributed;
pub use zeroshard_nn as nn;
pub use zeroshard_optim as optim;
pub use zeroshard_tensor as tensor;
pub use zeroshard_zero as zero;

// =============================================================================
// Training Utilities
// =============================================================================

pub mod trainer;
pub use trainer::{
    Callback, ProgressLogger, StepReport, Trainer, TrainingConfig, TrainingHistory, TrainingState,
};

// =============================================================================
// Logging
// =============================================================================

/// Installs a `tracing` subscriber that writes to stderr.
///
/// The filter comes from `RUST_LOG` when set and from `default_filter`
/// otherwise. Calling it again is a no-op, so every test may call it.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for sharded training.
///
/// ```rust
/// use zeroshard::prelude::*;
/// ```
pub mod prelude {
    pub use zeroshard_core::{DType, Device, MemoryBudget};
    pub use zeroshard_distributed::{
        free_port, run_with_retry, spawn, LocalBackend, MoeContext, ProcessGroup, World,
        ADDRESS_IN_USE_PATTERN,
    };
    pub use zeroshard_nn::{Linear, MSELoss, Module, MoeLayer, Parameter, ReLU, Sequential};
    pub use zeroshard_optim::{Adam, CpuAdam, HybridAdam, Optimizer, ParamOptimizer};
    pub use zeroshard_tensor::{seeded_rng, Tensor};
    pub use zeroshard_zero::{
        compare_with_reference, sync_reference, GradientHandler, MoeGradientHandler,
        ShardStrategyKind, ShardedModel, ShardedOptimizer, Tolerance, ZeroConfig, ZeroError,
        ZeroInitContext,
    };

    pub use crate::trainer::{StepReport, Trainer, TrainingConfig};
}

// =============================================================================
// Tests
// =============================================================================
