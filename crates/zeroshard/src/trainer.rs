//! High-Level Training Utilities
//!
//! `Trainer` drives a [`ShardedOptimizer`] through forward, loss, scaled
//! backward and step, and keeps the per-step history: losses, loss scales
//! and skipped steps.
//!
//! # Example
//! ```rust,ignore
//! use zeroshard::trainer::{Trainer, TrainingConfig};
//!
//! let mut trainer = Trainer::new(optim, TrainingConfig::new().epochs(3))
//!     .callback(Box::new(ProgressLogger::new(10)));
//! let history = trainer.fit(&batches)?;
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use zeroshard_distributed::MoeContext;
use zeroshard_nn::{MSELoss, Module};
use zeroshard_optim::Optimizer;
use zeroshard_tensor::Tensor;
use zeroshard_zero::{Result, ShardedOptimizer};

// =============================================================================
// Training Configuration
// =============================================================================

/// Configuration for training.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Number of passes over the batches
    pub epochs: usize,
    /// Logging frequency (steps)
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            log_every: 100,
        }
    }
}

impl TrainingConfig {
    /// Creates a new training configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set number of epochs.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Builder: set logging frequency.
    pub fn log_every(mut self, steps: usize) -> Self {
        self.log_every = steps.max(1);
        self
    }
}

// =============================================================================
// Training State
// =============================================================================

/// Current training state.
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    /// Steps attempted, skipped ones included
    pub global_step: usize,
    /// Steps skipped because of overflow
    pub skipped_steps: usize,
    /// Loss of every step in the current epoch
    pub train_losses: Vec<f32>,
    /// Loss scale after every step
    pub loss_scales: Vec<f32>,
}

impl TrainingState {
    /// Creates a new training state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns average training loss for current epoch.
    pub fn avg_train_loss(&self) -> f32 {
        if self.train_losses.is_empty() {
            0.0
        } else {
            self.train_losses.iter().sum::<f32>() / self.train_losses.len() as f32
        }
    }
}

/// Outcome of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Unscaled loss on this rank
    pub loss: f32,
    /// Auxiliary load-balancing loss accumulated by MoE layers
    pub aux_loss: f32,
    /// False when the step was skipped because of overflow
    pub applied: bool,
    /// Loss scale after the step
    pub loss_scale: f32,
}

// =============================================================================
// Callback Trait
// =============================================================================

/// Callback for training events.
pub trait Callback: Send {
    /// Called after each training step.
    fn on_step_end(&mut self, _step: usize, _report: &StepReport, _state: &TrainingState) {}

    /// Called at the end of an epoch.
    fn on_epoch_end(&mut self, _epoch: usize, _state: &TrainingState) {}
}

/// Logs progress through `tracing`.
pub struct ProgressLogger {
    log_every: usize,
}

impl ProgressLogger {
    /// Creates a new progress logger.
    pub fn new(log_every: usize) -> Self {
        Self {
            log_every: log_every.max(1),
        }
    }
}

impl Callback for ProgressLogger {
    fn on_step_end(&mut self, step: usize, report: &StepReport, _state: &TrainingState) {
        if step % self.log_every == 0 {
            info!(
                step,
                loss = report.loss,
                aux_loss = report.aux_loss,
                scale = report.loss_scale,
                applied = report.applied,
                "training step"
            );
        }
    }

    fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState) {
        info!(
            epoch = epoch + 1,
            avg_loss = state.avg_train_loss(),
            skipped = state.skipped_steps,
            "epoch complete"
        );
    }
}

// =============================================================================
// Training History
// =============================================================================

/// Complete training history.
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    /// Average training loss per epoch
    pub train_loss: Vec<f32>,
    /// Steps skipped because of overflow
    pub skipped_steps: usize,
    /// Training duration in seconds
    pub duration_secs: f64,
    /// Number of epochs completed
    pub epochs_completed: usize,
}

impl TrainingHistory {
    /// Returns the best training loss.
    pub fn best_train_loss(&self) -> Option<f32> {
        self.train_loss.iter().copied().reduce(f32::min)
    }
}

// =============================================================================
// Trainer
// =============================================================================

/// Drives a sharded optimizer with a mean-squared-error objective.
pub struct Trainer<M: Module, O: Optimizer> {
    optim: ShardedOptimizer<M, O>,
    loss_fn: MSELoss,
    moe: Option<Arc<MoeContext>>,
    config: TrainingConfig,
    state: TrainingState,
    callbacks: Vec<Box<dyn Callback>>,
}

impl<M: Module, O: Optimizer> Trainer<M, O> {
    /// Creates a trainer.
    pub fn new(optim: ShardedOptimizer<M, O>, config: TrainingConfig) -> Self {
        Self {
            optim,
            loss_fn: MSELoss::new(),
            moe: None,
            config,
            state: TrainingState::new(),
            callbacks: Vec::new(),
        }
    }

    /// Builder: report the auxiliary loss of MoE layers built on `ctx`.
    pub fn moe_context(mut self, ctx: Arc<MoeContext>) -> Self {
        self.moe = Some(ctx);
        self
    }

    /// Builder: add a callback.
    pub fn callback(mut self, callback: Box<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Returns the optimizer.
    pub fn optim(&self) -> &ShardedOptimizer<M, O> {
        &self.optim
    }

    /// Returns the optimizer mutably.
    pub fn optim_mut(&mut self) -> &mut ShardedOptimizer<M, O> {
        &mut self.optim
    }

    /// Returns the training state.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Runs forward, scaled backward and one optimizer step.
    pub fn train_step(&mut self, input: &Tensor, target: &Tensor) -> Result<StepReport> {
        if let Some(ctx) = &self.moe {
            ctx.reset_loss();
        }
        let output = self.optim.forward(input)?;
        let loss = self.loss_fn.compute(&output, target)?;
        let grad = self.loss_fn.backward(&output, target)?;
        self.optim.backward(&grad)?;
        let applied = self.optim.step()?;

        let report = StepReport {
            loss,
            aux_loss: self.moe.as_ref().map_or(0.0, |ctx| ctx.get_loss()),
            applied,
            loss_scale: self.optim.loss_scale(),
        };
        self.state.global_step += 1;
        if !applied {
            self.state.skipped_steps += 1;
        }
        self.state.train_losses.push(loss);
        self.state.loss_scales.push(report.loss_scale);

        let step = self.state.global_step;
        for callback in &mut self.callbacks {
            callback.on_step_end(step, &report, &self.state);
        }
        Ok(report)
    }

    /// Trains for the configured number of epochs over `batches`.
    pub fn fit(&mut self, batches: &[(Tensor, Tensor)]) -> Result<TrainingHistory> {
        let start = Instant::now();
        let mut history = TrainingHistory::default();
        for epoch in 0..self.config.epochs {
            self.state.epoch = epoch;
            self.state.train_losses.clear();
            for (input, target) in batches {
                let report = self.train_step(input, target)?;
                if self.state.global_step % self.config.log_every == 0 {
                    info!(step = self.state.global_step, loss = report.loss, "fit");
                }
            }
            history.train_loss.push(self.state.avg_train_loss());
            history.epochs_completed += 1;
            for callback in &mut self.callbacks {
                callback.on_epoch_end(epoch, &self.state);
            }
        }
        history.skipped_steps = self.state.skipped_steps;
        history.duration_secs = start.elapsed().as_secs_f64();
        Ok(history)
    }
}

// =============================================================================
// Tests
// =============================================================================
