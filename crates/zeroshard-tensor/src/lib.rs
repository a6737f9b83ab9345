//! zeroshard Tensor - Compute Arrays for the Sharded Engine
//!
//! This crate provides the `Tensor` type the compute layer works on, plus
//! the slice kernels the sharded optimizer applies to flat shard buffers.
//! A parameter's gathered view is a `Tensor`; its persistent shard is not.
//!
//! # Key Features
//! - Row-major `f32` tensors with shared storage
//! - 2-D matmul, transpose, row-wise softmax and `ReLU`
//! - Slice kernels for shard buffers (axpy, scale, norms, inf/nan counts)
//! - Seeded random initializers
//!
//! # Example
//! ```rust
//! use zeroshard_tensor::Tensor;
//!
//! let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
//! let b = a.matmul(&a).unwrap();
//! assert_eq!(b.to_vec(), vec![7.0, 10.0, 15.0, 22.0]);
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// ML/tensor-specific allowances
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::return_self_not_must_use)]

// =============================================================================
// Modules
// =============================================================================

pub mod creation;
pub mod ops;
pub mod shape;
pub mod tensor;

// =============================================================================
// Re-exports
// =============================================================================

pub use creation::{full, randn, seeded_rng, uniform, zeros};
pub use shape::Shape;
pub use tensor::Tensor;
pub use zeroshard_core::{DType, Device, Error, Result};

// =============================================================================
// Prelude
// =============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::shape::Shape;
    pub use crate::tensor::Tensor;
    pub use crate::{full, randn, seeded_rng, uniform, zeros};
    pub use zeroshard_core::{DType, Device, Error, Result};
}
