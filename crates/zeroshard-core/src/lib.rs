//! zeroshard Core - Foundation Layer for the zeroshard Engine
//!
//! This crate provides the primitives that the sharded training engine is
//! built on: device residency, the compute/master precision type system,
//! reference-counted payload storage that can be relocated between host and
//! device, and the memory budget consulted by the offload policy.
//!
//! # Key Features
//! - Device residency tags (host CPU and accelerator devices)
//! - Precision-aware scalar trait over `f16` and `f32`
//! - Shared payload storage with in-place relocation and release
//! - Host/device byte budgets for offload decisions
//!
//! # Example
//! ```rust
//! use zeroshard_core::{Device, Storage};
//!
//! let storage = Storage::<f32>::zeros(1024, Device::Cpu);
//! storage.relocate(Device::Cuda(0));
//! assert_eq!(storage.device(), Device::Cuda(0));
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
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::trivially_copy_pass_by_ref)]

// =============================================================================
// Modules
// =============================================================================

pub mod device;
pub mod dtype;
pub mod error;
pub mod memory;
pub mod storage;

// =============================================================================
// Re-exports
// =============================================================================

pub use device::Device;
pub use dtype::{DType, Scalar};
pub use error::{Error, Result};
pub use memory::{MemoryBudget, MemoryUsage};
pub use storage::Storage;

// =============================================================================
// Prelude
// =============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::device::Device;
    pub use crate::dtype::{DType, Scalar};
    pub use crate::error::{Error, Result};
    pub use crate::memory::{MemoryBudget, MemoryUsage};
    pub use crate::storage::Storage;
}
