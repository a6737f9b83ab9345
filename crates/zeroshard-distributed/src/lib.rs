//! zeroshard Distributed - Collectives, Groups and Bootstrap
//!
//! The communication layer under the sharded engine. Collectives are issued
//! on `ProcessGroup`s, which may be any subset of the world; the sharded
//! engine uses the full data-parallel group for dense parameters and the
//! expert replica groups from `MoeContext` for expert parameters.
//!
//! # Features
//!
//! ## Communication
//! - **Collective Operations**: all-reduce, all-gather, broadcast, reduce-scatter, barrier
//! - **Process Groups**: arbitrary rank subsets with independent sequencing
//! - **Gradient Buckets**: coalesced all-reduce of many small buffers
//!
//! ## Backends
//! - `LocalBackend`: one thread per rank, collectives rendezvous in-process
//! - Extensible `Backend` trait for other transports
//!
//! ## Bootstrap
//! - `launch` joins a world behind a host/port rendezvous
//! - `spawn` and `run_with_retry` run a whole group, relaunching on a fresh
//!   port when the failure matches "Address already in use"
//!
//! # Example
//!
//! ```rust
//! use zeroshard_distributed::prelude::*;
//!
//! let sums = spawn(2, free_port().unwrap(), |world| {
//!     let mut data = vec![world.rank() as f32 + 1.0];
//!     world.default_group().all_reduce(&mut data, ReduceOp::Sum)?;
//!     Ok::<_, DistributedError>(data[0])
//! })
//! .unwrap();
//! assert_eq!(sums, vec![3.0, 3.0]);
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
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::type_complexity)]

pub mod backend;
pub mod bucket;
pub mod comm;
pub mod error;
pub mod launch;
pub mod moe;
pub mod process_group;

// =============================================================================
// Re-exports
// =============================================================================

pub use backend::{Backend, LocalBackend, ReduceOp};
pub use bucket::GradientBucket;
pub use comm::{
    all_reduce_coalesced_mean, all_reduce_mean, all_reduce_scalar, all_reduce_sum,
    broadcast_from_first, equal_in_group, is_main_process,
};
pub use error::{DistributedError, Result};
pub use launch::{
    abandon, free_port, launch, run_with_retry, spawn, BackendKind, LaunchConfig,
    ADDRESS_IN_USE_PATTERN,
};
pub use moe::{ExpertParallelInfo, MoeContext};
pub use process_group::{ProcessGroup, World};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for distributed training.
pub mod prelude {
    pub use crate::{
        all_reduce_mean, all_reduce_sum, broadcast_from_first, equal_in_group, free_port, launch,
        run_with_retry, spawn, Backend, DistributedError, ExpertParallelInfo, LaunchConfig,
        LocalBackend, MoeContext, ProcessGroup, ReduceOp, World, ADDRESS_IN_USE_PATTERN,
    };
}
