//! Dynamic Gradient Scaler - Loss Scaling for Mixed Precision
//!
//! The loss is multiplied by `scale` before backward so that small gradients
//! survive half precision. After every step the scaler is told whether any
//! rank saw an overflow: an overflow shrinks the scale by `backoff_factor`
//! (after `hysteresis` overflows in a row), and `growth_interval` clean steps
//! in a row grow it by `growth_factor`. The scale stays within
//! `[min_scale, max_scale]`.
//!
//! # Example
//! ```rust
//! use zeroshard_optim::DynamicGradScaler;
//!
//! let mut scaler = DynamicGradScaler::new(32.0).growth_interval(2);
//! scaler.update(true);
//! assert_eq!(scaler.scale(), 16.0);
//! scaler.update(false);
//! scaler.update(false);
//! assert_eq!(scaler.scale(), 32.0);
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// DynamicGradScaler
// =============================================================================

/// Dynamic loss scaler.
#[derive(Debug, Clone)]
pub struct DynamicGradScaler {
    /// Current scale factor
    scale: f32,
    /// Factor to multiply scale by on growth
    growth_factor: f32,
    /// Factor to multiply scale by on overflow
    backoff_factor: f32,
    /// Number of clean steps before growing scale
    growth_interval: usize,
    /// Overflows in a row needed before backing off
    hysteresis: usize,
    /// Lower bound of the scale
    min_scale: f32,
    /// Upper bound of the scale
    max_scale: f32,
    /// Clean steps since the last growth or overflow
    growth_tracker: usize,
    /// Overflows left before the next backoff
    hysteresis_tracker: usize,
}

impl Default for DynamicGradScaler {
    fn default() -> Self {
        Self::new(65536.0)
    }
}

impl DynamicGradScaler {
    /// Creates a scaler starting at `initial_scale`.
    ///
    /// Defaults: growth 2.0, backoff 0.5, interval 1000, hysteresis 1,
    /// bounds `[1, 2^32]`.
    #[must_use]
    pub fn new(initial_scale: f32) -> Self {
        Self {
            scale: initial_scale,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 1000,
            hysteresis: 1,
            min_scale: 1.0,
            max_scale: 4_294_967_296.0,
            growth_tracker: 0,
            hysteresis_tracker: 1,
        }
    }

    /// Builder: set growth factor
    #[must_use]
    pub fn growth_factor(mut self, factor: f32) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Builder: set backoff factor
    #[must_use]
    pub fn backoff_factor(mut self, factor: f32) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Builder: set growth interval
    #[must_use]
    pub fn growth_interval(mut self, interval: usize) -> Self {
        self.growth_interval = interval.max(1);
        self
    }

    /// Builder: set hysteresis
    #[must_use]
    pub fn hysteresis(mut self, hysteresis: usize) -> Self {
        self.hysteresis = hysteresis.max(1);
        self.hysteresis_tracker = self.hysteresis;
        self
    }

    /// Builder: set scale bounds
    #[must_use]
    pub fn bounds(mut self, min_scale: f32, max_scale: f32) -> Self {
        self.min_scale = min_scale;
        self.max_scale = max_scale;
        self.scale = self.scale.clamp(min_scale, max_scale);
        self
    }

    /// Returns the current scale factor.
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Returns `1 / scale`.
    #[must_use]
    pub fn inv_scale(&self) -> f32 {
        1.0 / self.scale
    }

    /// Scales a loss value for backward pass.
    #[must_use]
    pub fn scale_loss(&self, loss: f32) -> f32 {
        loss * self.scale
    }

    /// Unscales gradients in place; returns true if all are finite.
    pub fn unscale_grads(&self, grads: &mut [f32]) -> bool {
        let inv_scale = self.inv_scale();
        let mut finite = true;
        for g in grads.iter_mut() {
            // Keep going so every element is unscaled.
            finite &= g.is_finite();
            *g *= inv_scale;
        }
        finite
    }

    /// Advances the scale after a step.
    pub fn update(&mut self, found_inf: bool) {
        if found_inf {
            self.growth_tracker = 0;
            self.hysteresis_tracker = self.hysteresis_tracker.saturating_sub(1);
            if self.hysteresis_tracker == 0 {
                self.scale = (self.scale * self.backoff_factor).max(self.min_scale);
                self.hysteresis_tracker = self.hysteresis;
                debug!(scale = self.scale, "loss scale backed off");
            }
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker >= self.growth_interval {
                self.scale = (self.scale * self.growth_factor).min(self.max_scale);
                self.growth_tracker = 0;
                self.hysteresis_tracker = self.hysteresis;
                debug!(scale = self.scale, "loss scale grown");
            }
        }
    }

    /// Returns the current state for checkpointing.
    #[must_use]
    pub fn state_dict(&self) -> GradScalerState {
        GradScalerState {
            scale: self.scale,
            growth_tracker: self.growth_tracker,
            hysteresis_tracker: self.hysteresis_tracker,
        }
    }

    /// Loads state from a checkpoint.
    pub fn load_state_dict(&mut self, state: GradScalerState) {
        self.scale = state.scale;
        self.growth_tracker = state.growth_tracker;
        self.hysteresis_tracker = state.hysteresis_tracker.max(1);
    }
}

/// Serializable state for scaler checkpointing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradScalerState {
    /// Current scale factor
    pub scale: f32,
    /// Growth tracker value
    pub growth_tracker: usize,
    /// Hysteresis tracker value
    pub hysteresis_tracker: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaler_creation() {
        let scaler = DynamicGradScaler::new(32.0);
        assert!((scaler.scale() - 32.0).abs() < 1e-6);
        assert!((scaler.inv_scale() - 1.0 / 32.0).abs() < 1e-9);
        assert!((scaler.scale_loss(0.5) - 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_unscale_grads() {
        let scaler = DynamicGradScaler::new(100.0);
        let mut grads = vec![100.0, 200.0, 300.0];
        assert!(scaler.unscale_grads(&mut grads));
        assert!((grads[0] - 1.0).abs() < 1e-6);
        assert!((grads[2] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_unscale_grads_with_inf_and_nan() {
        let scaler = DynamicGradScaler::new(100.0);
        let mut grads = vec![100.0, f32::INFINITY, 300.0];
        assert!(!scaler.unscale_grads(&mut grads));
        assert!((grads[2] - 3.0).abs() < 1e-6);

        let mut grads = vec![f32::NAN];
        assert!(!scaler.unscale_grads(&mut grads));
    }

    #[test]
    fn test_overflow_halves_and_floors() {
        let mut scaler = DynamicGradScaler::new(4.0).bounds(1.0, 1024.0);
        scaler.update(true);
        assert_eq!(scaler.scale(), 2.0);
        scaler.update(true);
        scaler.update(true);
        scaler.update(true);
        assert_eq!(scaler.scale(), 1.0);
    }

    #[test]
    fn test_scale_never_grows_on_overflow() {
        let mut scaler = DynamicGradScaler::new(64.0).growth_interval(1);
        let mut previous = scaler.scale();
        for found_inf in [true, false, true, true, false] {
            scaler.update(found_inf);
            if found_inf {
                assert!(scaler.scale() <= previous);
            }
            previous = scaler.scale();
        }
    }

    #[test]
    fn test_growth_after_interval() {
        let mut scaler = DynamicGradScaler::new(100.0).growth_interval(3);
        scaler.update(false);
        scaler.update(false);
        assert_eq!(scaler.scale(), 100.0);
        scaler.update(false);
        assert_eq!(scaler.scale(), 200.0);
    }

    #[test]
    fn test_overflow_resets_growth() {
        let mut scaler = DynamicGradScaler::new(8.0).growth_interval(2);
        scaler.update(false);
        scaler.update(true);
        scaler.update(false);
        assert_eq!(scaler.scale(), 4.0);
        scaler.update(false);
        assert_eq!(scaler.scale(), 8.0);
    }

    #[test]
    fn test_hysteresis_delays_backoff() {
        let mut scaler = DynamicGradScaler::new(8.0).hysteresis(2);
        scaler.update(true);
        assert_eq!(scaler.scale(), 8.0);
        scaler.update(true);
        assert_eq!(scaler.scale(), 4.0);
    }

    #[test]
    fn test_max_scale_caps_growth() {
        let mut scaler = DynamicGradScaler::new(8.0)
            .growth_interval(1)
            .bounds(1.0, 10.0);
        scaler.update(false);
        assert_eq!(scaler.scale(), 10.0);
    }

    #[test]
    fn test_state_dict_roundtrip() {
        let mut scaler = DynamicGradScaler::new(500.0).growth_interval(10);
        scaler.update(false);
        let state = scaler.state_dict();
        let text = toml::to_string(&state).unwrap();
        let restored: GradScalerState = toml::from_str(&text).unwrap();

        let mut fresh = DynamicGradScaler::new(1.0);
        fresh.load_state_dict(restored);
        assert_eq!(fresh.state_dict(), state);
    }
}
