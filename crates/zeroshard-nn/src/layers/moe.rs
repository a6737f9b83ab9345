//! MoE Layer - Expert-Parallel Mixture of Experts
//!
//! A dense softmax gate mixes the outputs of `num_experts` linear experts.
//! The experts are spread over the expert-parallel group: every member
//! gathers the group's tokens, runs its local experts on all of them, and a
//! reduce-scatter hands each member the mixed output for its own tokens.
//!
//! ```text
//! y_i = sum_e softmax(gate(x_i))_e * expert_e(x_i)
//! ```
//!
//! The gate is replicated on every rank; expert parameters carry the
//! layer's `ExpertParallelInfo` so their gradients are averaged over the
//! expert replica group only. Every member of the expert-parallel group must
//! pass the same batch size.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::sync::Arc;

use rand::Rng;
use tracing::trace;
use zeroshard_core::{Error, Result};
use zeroshard_distributed::{DistributedError, ExpertParallelInfo, MoeContext, ReduceOp};
use zeroshard_tensor::{seeded_rng, Tensor};

use crate::layers::linear::Linear;
use crate::module::{prefixed, Module};
use crate::parameter::Parameter;

fn comm_error(err: DistributedError) -> Error {
    Error::invalid_operation(format!("collective failed: {err}"))
}

// =============================================================================
// Forward Cache
// =============================================================================

struct MoeCache {
    /// Gate probabilities for this rank's tokens, `[batch, num_experts]`.
    probs: Vec<f32>,
    /// Gate probabilities for the whole expert-parallel group.
    probs_all: Vec<f32>,
    /// Output of each local expert on the group's tokens.
    expert_out: Vec<Vec<f32>>,
    batch: usize,
}

// =============================================================================
// MoeLayer
// =============================================================================

/// Mixture-of-experts layer with `d_model -> d_model` linear experts.
pub struct MoeLayer {
    /// Dense routing gate, `d_model -> num_experts`.
    pub gate: Linear,
    /// Experts hosted by this rank.
    pub experts: Vec<Linear>,
    ctx: Arc<MoeContext>,
    info: Arc<ExpertParallelInfo>,
    d_model: usize,
    num_experts: usize,
    first_expert: usize,
    cache: Option<MoeCache>,
}

impl MoeLayer {
    /// Creates the layer.
    ///
    /// `rng` must be seeded identically on every rank; it initializes the
    /// gate and salts the per-expert seeds drawn from `ctx`.
    pub fn new<R: Rng + ?Sized>(
        ctx: &Arc<MoeContext>,
        d_model: usize,
        num_experts: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let (local_experts, info) = ctx.get_info(num_experts).map_err(comm_error)?;
        let ep_rank = info.ep_group.local_rank().map_err(comm_error)?;
        let first_expert = ep_rank * local_experts;

        let gate = Linear::new(d_model, num_experts, rng);
        let salt: u64 = rng.gen();
        let experts = (first_expert..first_expert + local_experts)
            .map(|global| {
                let mut expert_rng = seeded_rng(ctx.expert_seed(global) ^ salt);
                Linear::expert(d_model, d_model, &info, &mut expert_rng)
            })
            .collect();

        trace!(
            num_experts,
            local_experts,
            first_expert,
            ep_size = info.ep_size,
            "moe layer built"
        );
        Ok(Self {
            gate,
            experts,
            ctx: Arc::clone(ctx),
            info,
            d_model,
            num_experts,
            first_expert,
            cache: None,
        })
    }

    /// Returns the total number of experts across the group.
    pub fn num_experts(&self) -> usize {
        self.num_experts
    }

    /// Returns the global index of this rank's first expert.
    pub fn first_expert(&self) -> usize {
        self.first_expert
    }

    /// Returns the expert-parallel layout.
    pub fn info(&self) -> &Arc<ExpertParallelInfo> {
        &self.info
    }

    /// Load-balancing statistic: `E * sum_e mean_b(p_be)^2`, 1.0 when balanced.
    fn balance_loss(&self, probs: &[f32], batch: usize) -> f32 {
        let e = self.num_experts;
        let mut importance = vec![0.0f32; e];
        for row in probs.chunks(e) {
            for (acc, p) in importance.iter_mut().zip(row) {
                *acc += p;
            }
        }
        let batch = batch.max(1) as f32;
        e as f32 * importance.iter().map(|v| (v / batch).powi(2)).sum::<f32>()
    }
}

impl Module for MoeLayer {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let batch = input.shape().first().copied().unwrap_or(0);
        let e = self.num_experts;
        let d = self.d_model;
        let group = &self.info.ep_group;

        let probs = self.gate.forward(input)?.softmax_rows()?.to_vec();
        let tokens = group.all_gather(&input.to_vec()).map_err(comm_error)?;
        let probs_all = group.all_gather(&probs).map_err(comm_error)?;
        let rows = tokens.len() / d.max(1);
        let tokens = Tensor::from_vec(tokens, &[rows, d])?;

        let mut mixed = vec![0.0f32; rows * d];
        let mut expert_out = Vec::with_capacity(self.experts.len());
        for (local, expert) in self.experts.iter_mut().enumerate() {
            let global = self.first_expert + local;
            let out = expert.forward(&tokens)?.to_vec();
            for ((dst, src), p) in mixed
                .chunks_mut(d)
                .zip(out.chunks(d))
                .zip(probs_all.chunks(e))
            {
                for (y, h) in dst.iter_mut().zip(src) {
                    *y += p[global] * h;
                }
            }
            expert_out.push(out);
        }

        let own = group
            .reduce_scatter(&mixed, ReduceOp::Sum)
            .map_err(comm_error)?;

        self.ctx.add_loss(self.balance_loss(&probs, batch));
        self.cache = Some(MoeCache {
            probs,
            probs_all,
            expert_out,
            batch,
        });
        Tensor::from_vec(own, &[batch, d])
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self
            .cache
            .take()
            .ok_or_else(|| Error::invalid_operation("MoeLayer::backward called before forward"))?;
        let e = self.num_experts;
        let d = self.d_model;
        let group = &self.info.ep_group;

        let grad_all = group
            .all_gather(&grad_output.to_vec())
            .map_err(comm_error)?;
        let rows = grad_all.len() / d.max(1);

        let mut grad_tokens = vec![0.0f32; rows * d];
        // Column `e` holds <dy, expert_e(x)> for experts hosted here.
        let mut scores = vec![0.0f32; rows * e];
        for (local, expert) in self.experts.iter_mut().enumerate() {
            let global = self.first_expert + local;
            let out = &cache.expert_out[local];

            let mut grad_expert = grad_all.clone();
            for (r, row) in grad_expert.chunks_mut(d).enumerate() {
                let p = cache.probs_all[r * e + global];
                let dy = &grad_all[r * d..(r + 1) * d];
                let h = &out[r * d..(r + 1) * d];
                scores[r * e + global] = dy.iter().zip(h).map(|(a, b)| a * b).sum();
                for g in row.iter_mut() {
                    *g *= p;
                }
            }

            let dx = expert.backward(&Tensor::from_vec(grad_expert, &[rows, d])?)?;
            for (acc, v) in grad_tokens.iter_mut().zip(dx.to_vec()) {
                *acc += v;
            }
        }

        let grad_input = group
            .reduce_scatter(&grad_tokens, ReduceOp::Sum)
            .map_err(comm_error)?;
        let scores = group
            .reduce_scatter(&scores, ReduceOp::Sum)
            .map_err(comm_error)?;

        // Softmax backward: dz_e = p_e * (s_e - sum_k p_k s_k)
        let mut grad_logits = vec![0.0f32; cache.batch * e];
        for ((dz, p), s) in grad_logits
            .chunks_mut(e)
            .zip(cache.probs.chunks(e))
            .zip(scores.chunks(e))
        {
            let dot: f32 = p.iter().zip(s).map(|(a, b)| a * b).sum();
            for k in 0..e {
                dz[k] = p[k] * (s[k] - dot);
            }
        }

        let grad_gate = self
            .gate
            .backward(&Tensor::from_vec(grad_logits, &[cache.batch, e])?)?;
        Tensor::from_vec(grad_input, &[cache.batch, d])?.add(&grad_gate)
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.named_parameters().into_iter().map(|(_, p)| p).collect()
    }

    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        let mut params = prefixed("gate", self.gate.named_parameters());
        for (local, expert) in self.experts.iter().enumerate() {
            let prefix = format!("experts.{}", self.first_expert + local);
            params.extend(prefixed(&prefix, expert.named_parameters()));
        }
        params
    }

    fn name(&self) -> &'static str {
        "MoeLayer"
    }
}

// =============================================================================
// Tests
// =============================================================================
