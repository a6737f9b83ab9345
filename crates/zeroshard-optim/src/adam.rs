//! Adam Optimizer - Adaptive Moment Estimation
//!
//! One update rule in three placements:
//!
//! - `Adam` keeps its state in device memory,
//! - `CpuAdam` keeps it in host memory and only updates host-resident shards,
//! - `HybridAdam` updates shards wherever they are and moves its state with
//!   them.
//!
//! Update rule:
//! ```text
//! m_t = beta1 * m_{t-1} + (1 - beta1) * grad
//! v_t = beta2 * v_{t-1} + (1 - beta2) * grad^2
//! m_hat = m_t / (1 - beta1^t)
//! v_hat = v_t / (1 - beta2^t)
//! param = param - lr * m_hat / (sqrt(v_hat) + eps)
//! ```
//!
//! With `adamw_mode` the weight decay is decoupled and applied to the
//! parameter directly; otherwise it is added to the gradient.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::collections::HashMap;

use zeroshard_core::{Device, Storage};

use crate::error::{OptimError, Result};
use crate::optimizer::{Optimizer, StatePlacement};

// =============================================================================
// Adam State
// =============================================================================

/// Moments for one slice.
#[derive(Debug)]
struct AdamState {
    /// First moment (mean of gradients).
    exp_avg: Storage<f32>,
    /// Second moment (variance of gradients).
    exp_avg_sq: Storage<f32>,
    /// Step count for bias correction.
    step: usize,
}

impl AdamState {
    fn new(size: usize, device: Device) -> Self {
        Self {
            exp_avg: Storage::zeros(size, device),
            exp_avg_sq: Storage::zeros(size, device),
            step: 0,
        }
    }

    fn device(&self) -> Device {
        self.exp_avg.device()
    }

    fn relocate(&self, device: Device) {
        self.exp_avg.relocate(device);
        self.exp_avg_sq.relocate(device);
    }
}

// =============================================================================
// AdamCore
// =============================================================================

/// Hyperparameters and per-slice state shared by the Adam variants.
#[derive(Debug)]
pub struct AdamCore {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    adamw_mode: bool,
    state: HashMap<usize, AdamState>,
}

impl AdamCore {
    fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            adamw_mode: true,
            state: HashMap::new(),
        }
    }

    /// Returns the step count recorded for `key`.
    #[must_use]
    pub fn step_count(&self, key: usize) -> usize {
        self.state.get(&key).map_or(0, |s| s.step)
    }

    fn update(
        &mut self,
        name: &'static str,
        placement: StatePlacement,
        key: usize,
        param: &mut [f32],
        grad: &[f32],
        device: Device,
    ) -> Result<()> {
        placement.check(name, device)?;
        if param.len() != grad.len() {
            return Err(OptimError::LengthMismatch {
                expected: param.len(),
                actual: grad.len(),
            });
        }

        let state = self
            .state
            .entry(key)
            .or_insert_with(|| AdamState::new(param.len(), device));
        if state.device() != device {
            state.relocate(device);
        }
        state.exp_avg.ensure_present(param.len())?;
        state.step += 1;

        let bias_correction1 = 1.0 - self.beta1.powi(state.step as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(state.step as i32);
        let step_size = self.lr / bias_correction1;

        let mut exp_avg = state.exp_avg.as_slice_mut();
        let mut exp_avg_sq = state.exp_avg_sq.as_slice_mut();
        for i in 0..param.len() {
            let mut g = grad[i];
            if self.weight_decay != 0.0 {
                if self.adamw_mode {
                    param[i] -= self.lr * self.weight_decay * param[i];
                } else {
                    g += self.weight_decay * param[i];
                }
            }
            exp_avg[i] = self.beta1 * exp_avg[i] + (1.0 - self.beta1) * g;
            exp_avg_sq[i] = self.beta2 * exp_avg_sq[i] + (1.0 - self.beta2) * g * g;
            let denom = (exp_avg_sq[i] / bias_correction2).sqrt() + self.eps;
            param[i] -= step_size * exp_avg[i] / denom;
        }
        Ok(())
    }
}

// =============================================================================
// Variants
// =============================================================================

macro_rules! adam_variant {
    ($(#[$meta:meta])* $name:ident, $placement:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            core: AdamCore,
        }

        impl $name {
            /// Creates the optimizer with default hyperparameters.
            #[must_use]
            pub fn new(lr: f32) -> Self {
                Self {
                    core: AdamCore::new(lr),
                }
            }

            /// Builder method to set betas.
            #[must_use]
            pub fn betas(mut self, betas: (f32, f32)) -> Self {
                self.core.beta1 = betas.0;
                self.core.beta2 = betas.1;
                self
            }

            /// Builder method to set epsilon.
            #[must_use]
            pub fn eps(mut self, eps: f32) -> Self {
                self.core.eps = eps;
                self
            }

            /// Builder method to set weight decay.
            #[must_use]
            pub fn weight_decay(mut self, weight_decay: f32) -> Self {
                self.core.weight_decay = weight_decay;
                self
            }

            /// Builder method to choose decoupled (AdamW) weight decay.
            #[must_use]
            pub fn adamw_mode(mut self, adamw_mode: bool) -> Self {
                self.core.adamw_mode = adamw_mode;
                self
            }

            /// Returns the shared Adam core.
            #[must_use]
            pub fn core(&self) -> &AdamCore {
                &self.core
            }
        }

        impl Optimizer for $name {
            fn name(&self) -> &'static str {
                stringify!($name)
            }

            fn placement(&self) -> StatePlacement {
                $placement
            }

            fn get_lr(&self) -> f32 {
                self.core.lr
            }

            fn set_lr(&mut self, lr: f32) {
                self.core.lr = lr;
            }

            fn step_shard(
                &mut self,
                key: usize,
                param: &mut [f32],
                grad: &[f32],
                device: Device,
            ) -> Result<()> {
                self.core
                    .update(stringify!($name), $placement, key, param, grad, device)
            }

            fn state_device(&self, key: usize) -> Option<Device> {
                self.core.state.get(&key).map(AdamState::device)
            }

            fn move_state(&mut self, key: usize, numel: usize, device: Device) {
                self.core
                    .state
                    .entry(key)
                    .or_insert_with(|| AdamState::new(numel, device))
                    .relocate(device);
            }

            fn state_bytes(&self, numel: usize) -> usize {
                2 * numel * core::mem::size_of::<f32>()
            }
        }
    };
}

adam_variant!(
    /// Adam with state in device memory.
    Adam,
    StatePlacement::Device
);

adam_variant!(
    /// Adam that runs on the host; requires CPU offload.
    CpuAdam,
    StatePlacement::Host
);

adam_variant!(
    /// Adam that runs wherever the shard is, host or device.
    HybridAdam,
    StatePlacement::Any
);

// =============================================================================
// Tests
// =============================================================================
