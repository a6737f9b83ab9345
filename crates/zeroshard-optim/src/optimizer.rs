//! Optimizer Trait - Core Optimizer Interface
//!
//! An update rule works on flat fp32 slices keyed by an integer, so the same
//! rule drives both a full parameter and one rank's shard of it. Each rule
//! declares where its state may live; the sharded optimizer checks that
//! declaration against its offload setting at construction.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use serde::{Deserialize, Serialize};
use zeroshard_core::Device;
use zeroshard_nn::Parameter;

use crate::error::{OptimError, Result};

// =============================================================================
// State Placement
// =============================================================================

/// Where an update rule can keep its state and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatePlacement {
    /// Device memory only.
    Device,
    /// Host memory only.
    Host,
    /// Either; the state follows the shard it updates.
    Any,
}

impl StatePlacement {
    /// Returns true if a shard on `device` can be updated.
    #[must_use]
    pub fn allows(self, device: Device) -> bool {
        match self {
            Self::Device => device.is_gpu(),
            Self::Host => device.is_cpu(),
            Self::Any => true,
        }
    }

    /// Fails with `OptimError::Placement` if `device` is not allowed.
    pub fn check(self, optimizer: &'static str, device: Device) -> Result<()> {
        if self.allows(device) {
            Ok(())
        } else {
            Err(OptimError::Placement { optimizer, device })
        }
    }
}

// =============================================================================
// Optimizer Trait
// =============================================================================

/// Trait for all update rules.
pub trait Optimizer: Send {
    /// Rule name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Where this rule keeps its state.
    fn placement(&self) -> StatePlacement;

    /// Returns the current learning rate.
    fn get_lr(&self) -> f32;

    /// Sets the learning rate.
    fn set_lr(&mut self, lr: f32);

    /// Updates `param` in place from `grad`.
    ///
    /// `key` identifies the slice across steps; `device` is where it lives.
    fn step_shard(&mut self, key: usize, param: &mut [f32], grad: &[f32], device: Device)
        -> Result<()>;

    /// Returns the device holding the state for `key`, once initialized.
    fn state_device(&self, key: usize) -> Option<Device>;

    /// Moves the state for `key`, creating it if needed.
    fn move_state(&mut self, key: usize, numel: usize, device: Device);

    /// Bytes of state this rule keeps for a slice of `numel` elements.
    fn state_bytes(&self, numel: usize) -> usize;
}

// =============================================================================
// Parameter Optimizer
// =============================================================================

/// Drives an update rule over whole, unsharded parameters.
pub struct ParamOptimizer<O: Optimizer> {
    params: Vec<Parameter>,
    optimizer: O,
}

impl<O: Optimizer> ParamOptimizer<O> {
    /// Wraps `optimizer` over `params`.
    pub fn new(params: Vec<Parameter>, optimizer: O) -> Self {
        Self { params, optimizer }
    }

    /// Updates every parameter that has a gradient.
    pub fn step(&mut self) -> Result<()> {
        for param in &self.params {
            if !param.requires_grad() {
                continue;
            }
            let Some(grad) = param.grad() else {
                continue;
            };

            let data = param.data()?;
            let mut values = data.to_vec();
            self.optimizer
                .step_shard(param.id(), &mut values, &grad.to_vec(), data.device())?;
            data.storage().copy_from_slice(&values)?;
        }
        Ok(())
    }

    /// Zeros all parameter gradients.
    pub fn zero_grad(&mut self) {
        for param in &self.params {
            param.zero_grad();
        }
    }

    /// Returns the parameters being optimized.
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Returns the wrapped rule.
    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Returns the wrapped rule mutably.
    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }
}

// =============================================================================
// Gradient Clipping
// =============================================================================

/// Factor that brings a gradient of norm `total_norm` down to `max_norm`.
///
/// Returns 1.0 when no clipping is needed.
#[must_use]
pub fn clip_coefficient(total_norm: f32, max_norm: f32) -> f32 {
    let coef = max_norm / (total_norm + 1e-6);
    if coef < 1.0 {
        coef
    } else {
        1.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement() {
        assert!(StatePlacement::Device.allows(Device::Cuda(0)));
        assert!(!StatePlacement::Device.allows(Device::Cpu));
        assert!(StatePlacement::Host.allows(Device::Cpu));
        assert!(!StatePlacement::Host.allows(Device::Cuda(0)));
        assert!(StatePlacement::Any.allows(Device::Cpu));

        let err = StatePlacement::Host.check("CpuAdam", Device::Cuda(1)).unwrap_err();
        assert!(err.to_string().contains("cuda:1"));
    }

    #[test]
    fn test_clip_coefficient() {
        assert_eq!(clip_coefficient(0.5, 1.0), 1.0);
        assert!((clip_coefficient(4.0, 1.0) - 0.25).abs() < 1e-5);
    }
}
