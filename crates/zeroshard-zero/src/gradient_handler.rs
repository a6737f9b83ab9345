//! Gradient Handlers - Post-Backward Reduction for Unsharded Models
//!
//! A handler runs once after backward and leaves every gradient averaged
//! over the ranks that replicate its parameter. The dense handler averages
//! everything over the world. The MoE handler averages dense gradients over
//! the world and expert gradients only over their replica group, the ranks
//! holding the same expert. A replica group of one rank needs no
//! communication.
//!
//! Both reduce in buckets, and both return only after every reduction has
//! completed.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use tracing::trace;
use zeroshard_distributed::bucket::DEFAULT_BUCKET_CAPACITY;
use zeroshard_distributed::{all_reduce_coalesced_mean, ProcessGroup, World};
use zeroshard_nn::Parameter;
use zeroshard_tensor::Tensor;

use crate::error::Result;

// =============================================================================
// GradientHandler Trait
// =============================================================================

/// Post-backward gradient reduction.
pub trait GradientHandler {
    /// Reduces the gradients of `params` in place.
    fn handle_gradient(&self, params: &[Parameter]) -> Result<()>;
}

/// Averages the gradients of `params` over `group`, one bucket at a time.
fn average_over(params: &[&Parameter], group: &ProcessGroup, capacity: usize) -> Result<()> {
    if params.is_empty() || group.size() == 1 {
        return Ok(());
    }
    // Missing gradients still join the collective as zeros.
    let mut buffers: Vec<Vec<f32>> = params
        .iter()
        .map(|p| p.grad().map_or_else(|| vec![0.0; p.numel()], |g| g.to_vec()))
        .collect();
    all_reduce_coalesced_mean(&mut buffers, group, capacity)?;
    for (param, buffer) in params.iter().zip(buffers) {
        param.set_grad(Some(Tensor::from_vec(buffer, &param.shape())?));
    }
    trace!(params = params.len(), group = ?group.ranks(), "averaged gradients");
    Ok(())
}

// =============================================================================
// DataParallelGradientHandler
// =============================================================================

/// Averages every gradient over the world.
#[derive(Debug, Clone)]
pub struct DataParallelGradientHandler {
    group: ProcessGroup,
    bucket_capacity: usize,
}

impl DataParallelGradientHandler {
    /// Creates a handler over the world's default group.
    pub fn new(world: &World) -> Self {
        Self {
            group: world.default_group().clone(),
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
        }
    }

    /// Builder: set the bucket capacity in elements.
    pub fn bucket_capacity(mut self, capacity: usize) -> Self {
        self.bucket_capacity = capacity.max(1);
        self
    }
}

impl GradientHandler for DataParallelGradientHandler {
    fn handle_gradient(&self, params: &[Parameter]) -> Result<()> {
        let all: Vec<&Parameter> = params.iter().filter(|p| p.requires_grad()).collect();
        average_over(&all, &self.group, self.bucket_capacity)
    }
}

// =============================================================================
// MoeGradientHandler
// =============================================================================

/// Averages dense gradients over the world and expert gradients over their
/// replica group.
#[derive(Debug, Clone)]
pub struct MoeGradientHandler {
    dense: DataParallelGradientHandler,
}

impl MoeGradientHandler {
    /// Creates a handler for `world`.
    pub fn new(world: &World) -> Self {
        Self {
            dense: DataParallelGradientHandler::new(world),
        }
    }

    /// Builder: set the bucket capacity in elements.
    pub fn bucket_capacity(mut self, capacity: usize) -> Self {
        self.dense = self.dense.bucket_capacity(capacity);
        self
    }
}

impl GradientHandler for MoeGradientHandler {
    fn handle_gradient(&self, params: &[Parameter]) -> Result<()> {
        let (experts, dense): (Vec<&Parameter>, Vec<&Parameter>) = params
            .iter()
            .filter(|p| p.requires_grad())
            .partition(|p| p.is_expert());
        average_over(&dense, &self.dense.group, self.dense.bucket_capacity)?;

        // Expert parameters grouped by replica group, in order of first
        // appearance.
        let mut groups: Vec<(ProcessGroup, Vec<&Parameter>)> = Vec::new();
        for param in experts {
            let Some(info) = param.moe_info() else {
                continue;
            };
            match groups.iter_mut().find(|(g, _)| g.ranks() == info.dp_group.ranks()) {
                Some((_, members)) => members.push(param),
                None => groups.push((info.dp_group.clone(), vec![param])),
            }
        }
        for (group, members) in &groups {
            average_over(members, group, self.dense.bucket_capacity)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZeroError;
    use std::sync::Arc;
    use zeroshard_distributed::{free_port, spawn, MoeContext};

    fn grad_of(param: &Parameter) -> Vec<f32> {
        param.grad().map(|g| g.to_vec()).unwrap_or_default()
    }

    #[test]
    fn test_dense_handler_averages() {
        let port = free_port().unwrap();
        let grads = spawn(2, port, |world| -> core::result::Result<Vec<f32>, ZeroError> {
            let p = Parameter::new(Tensor::zeros(&[2]), true);
            let g = world.rank() as f32 * 2.0;
            p.set_grad(Some(Tensor::from_vec(vec![g, 1.0], &[2])?));
            DataParallelGradientHandler::new(&world).handle_gradient(&[p.clone()])?;
            Ok(grad_of(&p))
        })
        .unwrap();
        assert_eq!(grads, vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
    }

    fn expert_partition(world_size: usize) -> Vec<(Vec<f32>, Vec<f32>)> {
        let port = free_port().unwrap();
        spawn(world_size, port, |world| -> core::result::Result<_, ZeroError> {
            let ctx = MoeContext::setup(&world, 0, None)?;
            let (_, info) = ctx.get_info(2)?;
            let rank = world.rank() as f32;
            let dense = Parameter::new(Tensor::zeros(&[1]), true);
            dense.set_grad(Some(Tensor::from_vec(vec![rank], &[1])?));
            let expert = Parameter::expert("w", Tensor::zeros(&[1]), Arc::clone(&info));
            expert.set_grad(Some(Tensor::from_vec(vec![rank], &[1])?));
            MoeGradientHandler::new(&world)
                .bucket_capacity(1)
                .handle_gradient(&[dense.clone(), expert.clone()])?;
            Ok((grad_of(&dense), grad_of(&expert)))
        })
        .unwrap()
    }

    #[test]
    fn test_moe_handler_two_ranks() {
        // Each rank holds its own expert; expert gradients stay local.
        let results = expert_partition(2);
        assert_eq!(results[0], (vec![0.5], vec![0.0]));
        assert_eq!(results[1], (vec![0.5], vec![1.0]));
    }

    #[test]
    fn test_moe_handler_four_ranks() {
        // Replica groups are {0, 2} and {1, 3}.
        let results = expert_partition(4);
        let experts: Vec<f32> = results.iter().map(|(_, e)| e[0]).collect();
        assert_eq!(experts, vec![1.0, 2.0, 1.0, 2.0]);
        assert!(results.iter().all(|(d, _)| d == &vec![1.5]));
    }

    #[test]
    fn test_single_rank_is_noop() {
        let world = World::single();
        let p = Parameter::new(Tensor::zeros(&[2]), true);
        p.set_grad(Some(Tensor::full(&[2], 3.0)));
        MoeGradientHandler::new(&world).handle_gradient(&[p.clone()]).unwrap();
        assert_eq!(grad_of(&p), vec![3.0, 3.0]);
    }
}
