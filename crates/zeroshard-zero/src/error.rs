//! Error Types - Sharded Engine Errors
//!
//! Numeric overflow is not an error: it is counted by the sharded model and
//! handled by skipping the optimizer step.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use thiserror::Error;

/// Errors raised by the sharded engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZeroError {
    /// Invalid construction-time configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A parameter reached the optimizer without its gradient shard.
    #[error("Parameter '{param}' has no gradient shard (group {group:?})")]
    PreconditionViolation {
        /// Parameter name.
        param: String,
        /// Global ranks of the parameter's shard group.
        group: Vec<usize>,
    },

    /// A shard was used in a state that does not allow it.
    #[error("Invalid shard state: {0}")]
    ShardState(String),

    /// Error from the core layer.
    #[error(transparent)]
    Core(#[from] zeroshard_core::Error),

    /// Error from the communication layer.
    #[error(transparent)]
    Distributed(#[from] zeroshard_distributed::DistributedError),

    /// Error from an update rule.
    #[error(transparent)]
    Optim(#[from] zeroshard_optim::OptimError),
}

impl ZeroError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a shard state error.
    pub fn shard_state(message: impl Into<String>) -> Self {
        Self::ShardState(message.into())
    }
}

/// Result type for sharded engine operations.
pub type Result<T> = core::result::Result<T, ZeroError>;
