//! Config - Sharded Engine Configuration
//!
//! `ZeroConfig` collects every knob of the engine. It deserializes from TOML
//! with defaults for every field, so a file only names what it changes:
//!
//! ```toml
//! shard_strategy = "bucket"
//! cpu_offload = true
//! gpu_margin_mem_ratio = 0.7
//! reuse_fp16_shard = true
//!
//! [loss_scale]
//! initial_scale = 32.0
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::path::Path;

use serde::{Deserialize, Serialize};
use zeroshard_core::{DType, MemoryBudget};
use zeroshard_optim::DynamicGradScaler;

use crate::error::{Result, ZeroError};
use crate::strategy::ShardStrategyKind;

// =============================================================================
// Engine Configuration
// =============================================================================

/// Configuration of the sharded engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroConfig {
    /// How parameters are split across their shard group.
    #[serde(default)]
    pub shard_strategy: ShardStrategyKind,

    /// Elements per all-gather for the bucketed strategy.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,

    /// Shard parameters at construction; when false every parameter is
    /// kept whole.
    #[serde(default = "default_true")]
    pub shard_param: bool,

    /// Parameters with fewer elements are kept whole.
    #[serde(default)]
    pub replicate_threshold: usize,

    /// Precision of the compute payload.
    #[serde(default = "default_compute_dtype")]
    pub compute_dtype: DType,

    /// Keep payloads, gradient shards, master shards and optimizer state on
    /// the host between uses.
    #[serde(default)]
    pub cpu_offload: bool,

    /// Fraction of the spare device memory that master shards and their
    /// optimizer state may occupy when `cpu_offload` is set.
    #[serde(default)]
    pub gpu_margin_mem_ratio: f32,

    /// Store the gradient shard in the compute payload's buffer.
    #[serde(default)]
    pub reuse_fp16_shard: bool,

    /// Record device memory at forward and backward boundaries.
    #[serde(default)]
    pub use_memory_tracer: bool,

    /// Clip the global gradient norm to this value.
    #[serde(default)]
    pub max_grad_norm: Option<f32>,

    /// Loss scaling.
    #[serde(default)]
    pub loss_scale: LossScaleConfig,

    /// Host and device ceilings.
    #[serde(default)]
    pub budget: MemoryBudget,

    /// Tolerance for comparing sharded parameters against a reference.
    #[serde(default)]
    pub tolerance: Tolerance,
}

fn default_bucket_size() -> usize {
    1 << 20
}
fn default_true() -> bool {
    true
}
fn default_compute_dtype() -> DType {
    DType::F16
}

impl Default for ZeroConfig {
    fn default() -> Self {
        Self {
            shard_strategy: ShardStrategyKind::default(),
            bucket_size: default_bucket_size(),
            shard_param: true,
            replicate_threshold: 0,
            compute_dtype: default_compute_dtype(),
            cpu_offload: false,
            gpu_margin_mem_ratio: 0.0,
            reuse_fp16_shard: false,
            use_memory_tracer: false,
            max_grad_norm: None,
            loss_scale: LossScaleConfig::default(),
            budget: MemoryBudget::default(),
            tolerance: Tolerance::default(),
        }
    }
}

impl ZeroConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ZeroError::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ZeroError::configuration(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Serializes to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ZeroError::configuration(e.to_string()))
    }

    /// Checks ranges and combinations that no component can accept.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gpu_margin_mem_ratio) {
            return Err(ZeroError::configuration(format!(
                "gpu_margin_mem_ratio must be within [0, 1], got {}",
                self.gpu_margin_mem_ratio
            )));
        }
        if self.bucket_size == 0 {
            return Err(ZeroError::configuration("bucket_size must be positive"));
        }
        if let Some(norm) = self.max_grad_norm {
            if norm <= 0.0 {
                return Err(ZeroError::configuration("max_grad_norm must be positive"));
            }
        }
        self.loss_scale.validate()
    }

    /// Builder: clip the global gradient norm.
    pub fn max_grad_norm(mut self, norm: f32) -> Self {
        self.max_grad_norm = Some(norm);
        self
    }

    /// Builder: set the strategy.
    pub fn shard_strategy(mut self, kind: ShardStrategyKind) -> Self {
        self.shard_strategy = kind;
        self
    }

    /// Builder: enable or disable CPU offload.
    pub fn cpu_offload(mut self, enabled: bool) -> Self {
        self.cpu_offload = enabled;
        self
    }

    /// Builder: set the device margin ratio.
    pub fn gpu_margin_mem_ratio(mut self, ratio: f32) -> Self {
        self.gpu_margin_mem_ratio = ratio;
        self
    }

    /// Builder: enable or disable compute-shard reuse.
    pub fn reuse_fp16_shard(mut self, enabled: bool) -> Self {
        self.reuse_fp16_shard = enabled;
        self
    }

    /// Builder: enable or disable the memory tracer.
    pub fn use_memory_tracer(mut self, enabled: bool) -> Self {
        self.use_memory_tracer = enabled;
        self
    }

    /// Builder: set the initial loss scale.
    pub fn initial_scale(mut self, scale: f32) -> Self {
        self.loss_scale.initial_scale = scale;
        self
    }

    /// Builder: set the whole-parameter threshold.
    pub fn replicate_threshold(mut self, numel: usize) -> Self {
        self.replicate_threshold = numel;
        self
    }

    /// Builder: set the compute precision.
    pub fn compute_dtype(mut self, dtype: DType) -> Self {
        self.compute_dtype = dtype;
        self
    }

    /// Builder: set the memory budget.
    pub fn budget(mut self, budget: MemoryBudget) -> Self {
        self.budget = budget;
        self
    }
}

// =============================================================================
// Loss Scale Configuration
// =============================================================================

/// Dynamic loss scaling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossScaleConfig {
    /// Scale before the first step
    #[serde(default = "default_initial_scale")]
    pub initial_scale: f32,
    /// Factor applied after `growth_interval` clean steps
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f32,
    /// Factor applied on overflow
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f32,
    /// Clean steps before growing
    #[serde(default = "default_growth_interval")]
    pub growth_interval: usize,
    /// Overflows in a row before backing off. The default of 1 halves the
    /// scale on every overflow step.
    #[serde(default = "default_hysteresis")]
    pub hysteresis: usize,
    /// Lower bound
    #[serde(default = "default_min_scale")]
    pub min_scale: f32,
    /// Upper bound
    #[serde(default = "default_max_scale")]
    pub max_scale: f32,
}

fn default_initial_scale() -> f32 {
    32.0
}
fn default_growth_factor() -> f32 {
    2.0
}
fn default_backoff_factor() -> f32 {
    0.5
}
fn default_growth_interval() -> usize {
    1000
}
fn default_hysteresis() -> usize {
    1
}
fn default_min_scale() -> f32 {
    1.0
}
fn default_max_scale() -> f32 {
    4_294_967_296.0
}

impl Default for LossScaleConfig {
    fn default() -> Self {
        Self {
            initial_scale: default_initial_scale(),
            growth_factor: default_growth_factor(),
            backoff_factor: default_backoff_factor(),
            growth_interval: default_growth_interval(),
            hysteresis: default_hysteresis(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
        }
    }
}

impl LossScaleConfig {
    fn validate(&self) -> Result<()> {
        if self.hysteresis == 0 {
            return Err(ZeroError::configuration("hysteresis must be at least 1"));
        }
        if self.min_scale <= 0.0 || self.min_scale > self.max_scale {
            return Err(ZeroError::configuration(format!(
                "loss scale bounds [{}, {}] are invalid",
                self.min_scale, self.max_scale
            )));
        }
        if !(self.backoff_factor > 0.0 && self.backoff_factor < 1.0) || self.growth_factor < 1.0 {
            return Err(ZeroError::configuration(
                "backoff_factor must be in (0, 1) and growth_factor at least 1",
            ));
        }
        Ok(())
    }

    /// Builds the scaler these parameters describe.
    pub fn build(&self) -> DynamicGradScaler {
        DynamicGradScaler::new(self.initial_scale)
            .growth_factor(self.growth_factor)
            .backoff_factor(self.backoff_factor)
            .growth_interval(self.growth_interval)
            .hysteresis(self.hysteresis)
            .bounds(self.min_scale, self.max_scale)
    }
}

// =============================================================================
// Tolerance
// =============================================================================

/// Relative and absolute tolerance for parameter comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Relative tolerance
    #[serde(default = "default_rtol")]
    pub rtol: f32,
    /// Absolute tolerance
    #[serde(default = "default_atol")]
    pub atol: f32,
}

fn default_rtol() -> f32 {
    1e-3
}
fn default_atol() -> f32 {
    1e-2
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: default_rtol(),
            atol: default_atol(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
