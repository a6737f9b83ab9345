//! zeroshard-optim - Update Rules and Loss Scaling
//!
//! Update rules work on flat fp32 slices so the sharded optimizer can run
//! them on one rank's master shard, and `ParamOptimizer` runs them over whole
//! parameters for an unsharded reference.
//!
//! # Optimizers
//!
//! - **Adam** - state in device memory
//! - **CpuAdam** - state in host memory; requires CPU offload
//! - **HybridAdam** - state follows the shard, host or device
//!
//! # Mixed Precision Support
//!
//! - **DynamicGradScaler** - loss scaling with overflow backoff and growth
//!
//! # Example
//!
//! ```rust
//! use zeroshard_nn::{Linear, Module};
//! use zeroshard_optim::prelude::*;
//! use zeroshard_tensor::{seeded_rng, Tensor};
//!
//! let mut layer = Linear::new(2, 1, &mut seeded_rng(0));
//! let mut optimizer = ParamOptimizer::new(layer.parameters(), CpuAdam::new(0.01));
//!
//! let y = layer.forward(&Tensor::full(&[1, 2], 1.0)).unwrap();
//! layer.backward(&Tensor::full(y.shape(), 1.0)).unwrap();
//! optimizer.step().unwrap();
//! optimizer.zero_grad();
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::float_cmp)]

pub mod adam;
pub mod error;
pub mod grad_scaler;
pub mod optimizer;

// =============================================================================
// Re-exports
// =============================================================================

pub use adam::{Adam, AdamCore, CpuAdam, HybridAdam};
pub use error::{OptimError, Result};
pub use grad_scaler::{DynamicGradScaler, GradScalerState};
pub use optimizer::{clip_coefficient, Optimizer, ParamOptimizer, StatePlacement};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for optimization.
pub mod prelude {
    pub use crate::{
        Adam, CpuAdam, DynamicGradScaler, HybridAdam, Optimizer, ParamOptimizer, StatePlacement,
    };
}
