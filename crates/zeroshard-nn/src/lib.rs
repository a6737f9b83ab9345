//! zeroshard-nn - Layers and Parameters
//!
//! The model side of the engine: shared parameter handles, the `Module`
//! trait with explicit backward, and the dense and mixture-of-experts layers
//! the sharded engine trains.
//!
//! # Key Components
//!
//! - **Module trait**: forward, backward and parameter enumeration
//! - **Parameter**: shared handle whose compute view can be released
//! - **Hooks**: thread-local observers of parameter creation
//! - **Layers**: Linear, MoeLayer
//! - **Sequential**: container for chaining modules
//! - **Loss Functions**: MSE
//! - **Initialization**: seeded Xavier and Kaiming
//!
//! # Example
//!
//! ```rust
//! use zeroshard_nn::prelude::*;
//! use zeroshard_tensor::{seeded_rng, Tensor};
//!
//! let mut rng = seeded_rng(0);
//! let mut model = Sequential::new()
//!     .add(Linear::new(4, 8, &mut rng))
//!     .add(ReLU::new())
//!     .add(Linear::new(8, 1, &mut rng));
//!
//! let x = Tensor::zeros(&[2, 4]);
//! let target = Tensor::zeros(&[2, 1]);
//! let y = model.forward(&x).unwrap();
//! let loss = MSELoss::new();
//! let _value = loss.compute(&y, &target).unwrap();
//! model.backward(&loss.backward(&y, &target).unwrap()).unwrap();
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
#![allow(clippy::similar_names)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::new_without_default)]

pub mod activation;
pub mod hooks;
pub mod init;
pub mod layers;
pub mod loss;
pub mod module;
pub mod parameter;
pub mod sequential;

// =============================================================================
// Re-exports
// =============================================================================

pub use activation::ReLU;
pub use hooks::{with_hook, ParameterHook};
pub use layers::{Linear, MoeLayer};
pub use loss::{MSELoss, Reduction};
pub use module::Module;
pub use parameter::Parameter;
pub use sequential::Sequential;

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for building models.
pub mod prelude {
    pub use crate::{
        Linear, MSELoss, Module, MoeLayer, Parameter, ParameterHook, ReLU, Reduction, Sequential,
    };
}
