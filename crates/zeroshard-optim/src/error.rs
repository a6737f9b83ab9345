//! Error Types - Optimizer Errors
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use thiserror::Error;
use zeroshard_core::Device;

/// Errors raised by update rules.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimError {
    /// The update rule cannot run on the device the shard lives on.
    #[error("{optimizer} cannot update a shard resident on {device}")]
    Placement {
        /// Update rule name.
        optimizer: &'static str,
        /// Device the shard lives on.
        device: Device,
    },

    /// Parameter and gradient lengths differ.
    #[error("Gradient length {actual} does not match parameter length {expected}")]
    LengthMismatch {
        /// Parameter length.
        expected: usize,
        /// Gradient length.
        actual: usize,
    },

    /// Invalid hyperparameter.
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    /// Error from the core layer.
    #[error(transparent)]
    Core(#[from] zeroshard_core::Error),
}

/// Result type for optimizer operations.
pub type Result<T> = core::result::Result<T, OptimError>;
