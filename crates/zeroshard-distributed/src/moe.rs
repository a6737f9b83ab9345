//! MoE Context - Expert-Parallel Layout
//!
//! `MoeContext` is created once per rank after launch and handed to every
//! MoE layer and gradient handler that needs it. For a given expert count it
//! decides how many experts each rank hosts and builds two groups:
//!
//! - the **expert-parallel group**: ranks that together host one full set of
//!   experts (tokens are routed across it),
//! - the **expert replica group** (`dp_group`): ranks holding the same
//!   expert, over which that expert's gradients are averaged.
//!
//! # Example
//! ```rust
//! use zeroshard_distributed::{MoeContext, World};
//!
//! let ctx = MoeContext::setup(&World::single(), 42, None).unwrap();
//! let (local_experts, info) = ctx.get_info(2).unwrap();
//! assert_eq!(local_experts, 2);
//! assert_eq!(info.ep_size, 1);
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{DistributedError, Result};
use crate::process_group::{ProcessGroup, World};

// =============================================================================
// ExpertParallelInfo
// =============================================================================

/// Group layout for one expert count.
#[derive(Debug, Clone)]
pub struct ExpertParallelInfo {
    /// Number of ranks across which one set of experts is spread.
    pub ep_size: usize,
    /// Number of replicas of each expert.
    pub dp_size: usize,
    /// Ranks that together host one full set of experts.
    pub ep_group: ProcessGroup,
    /// Ranks holding the same experts as this rank.
    pub dp_group: ProcessGroup,
}

// =============================================================================
// MoeContext
// =============================================================================

/// Per-rank expert-parallel context.
#[derive(Debug)]
pub struct MoeContext {
    world: World,
    seed: u64,
    max_ep_size: usize,
    min_dp_size: usize,
    infos: Mutex<HashMap<usize, Arc<ExpertParallelInfo>>>,
    aux_loss: Mutex<f32>,
}

impl MoeContext {
    /// Creates the context. `max_ep_size` defaults to the world size.
    pub fn setup(world: &World, seed: u64, max_ep_size: Option<usize>) -> Result<Arc<Self>> {
        let world_size = world.world_size();
        let max_ep_size = max_ep_size.unwrap_or(world_size).min(world_size);
        if max_ep_size == 0 || world_size % max_ep_size != 0 {
            return Err(DistributedError::InvalidConfiguration(format!(
                "world size {world_size} is not a multiple of max expert-parallel size {max_ep_size}"
            )));
        }
        debug!(rank = world.rank(), seed, max_ep_size, "moe context set up");
        Ok(Arc::new(Self {
            world: world.clone(),
            seed,
            max_ep_size,
            min_dp_size: world_size / max_ep_size,
            infos: Mutex::new(HashMap::new()),
            aux_loss: Mutex::new(0.0),
        }))
    }

    /// Returns the world this context was built over.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Returns the largest expert-parallel group size.
    #[must_use]
    pub fn max_ep_size(&self) -> usize {
        self.max_ep_size
    }

    /// Returns `(experts hosted by this rank, layout)` for `num_experts`.
    pub fn get_info(&self, num_experts: usize) -> Result<(usize, Arc<ExpertParallelInfo>)> {
        let max_ep = self.max_ep_size;
        let divides = num_experts > 0 && num_experts % max_ep == 0;
        let divisor = num_experts > 0 && max_ep % num_experts == 0;
        if !divides && !divisor {
            return Err(DistributedError::InvalidConfiguration(format!(
                "{num_experts} experts cannot be spread over {max_ep} ranks"
            )));
        }

        let local_experts = if divisor { 1 } else { num_experts / max_ep };

        let mut infos = self.infos.lock();
        if let Some(info) = infos.get(&num_experts) {
            return Ok((local_experts, Arc::clone(info)));
        }

        let replicas = if divides { 1 } else { max_ep / num_experts };
        let ep_size = max_ep / replicas;
        let dp_size = replicas * self.min_dp_size;
        let info = Arc::new(self.build_info(ep_size, dp_size)?);
        infos.insert(num_experts, Arc::clone(&info));
        Ok((local_experts, info))
    }

    fn build_info(&self, ep_size: usize, dp_size: usize) -> Result<ExpertParallelInfo> {
        let rank = self.world.rank();
        let ep_index = rank / ep_size;
        let ep_offset = rank % ep_size;
        let ep_ranks: Vec<usize> = (0..ep_size).map(|j| ep_index * ep_size + j).collect();
        let dp_ranks: Vec<usize> = (0..dp_size).map(|i| i * ep_size + ep_offset).collect();

        debug!(rank, ?ep_ranks, ?dp_ranks, "expert parallel groups");
        Ok(ExpertParallelInfo {
            ep_size,
            dp_size,
            ep_group: self.world.new_group(ep_ranks)?,
            dp_group: self.world.new_group(dp_ranks)?,
        })
    }

    // =========================================================================
    // Seeds
    // =========================================================================

    /// Seed for dense parameters; identical on every rank.
    #[must_use]
    pub fn dense_seed(&self) -> u64 {
        self.seed
    }

    /// Seed for the expert with global index `expert`.
    #[must_use]
    pub fn expert_seed(&self, expert: usize) -> u64 {
        self.seed.wrapping_add(1 + expert as u64)
    }

    // =========================================================================
    // Auxiliary Loss
    // =========================================================================

    /// Adds a load-balancing loss term.
    pub fn add_loss(&self, loss: f32) {
        *self.aux_loss.lock() += loss;
    }

    /// Returns the accumulated auxiliary loss.
    #[must_use]
    pub fn get_loss(&self) -> f32 {
        *self.aux_loss.lock()
    }

    /// Clears the accumulated auxiliary loss.
    pub fn reset_loss(&self) {
        *self.aux_loss.lock() = 0.0;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use std::thread;

    fn layouts(world_size: usize, num_experts: usize) -> Vec<(usize, usize, usize, Vec<usize>, Vec<usize>)> {
        let backends = LocalBackend::create_world(world_size);
        thread::scope(|s| {
            let handles: Vec<_> = backends
                .into_iter()
                .map(|b| {
                    s.spawn(move || {
                        let world = World::init(Arc::new(b));
                        let ctx = MoeContext::setup(&world, 42, None).unwrap();
                        let (local, info) = ctx.get_info(num_experts).unwrap();
                        (
                            local,
                            info.ep_size,
                            info.dp_size,
                            info.ep_group.ranks().to_vec(),
                            info.dp_group.ranks().to_vec(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_two_ranks_two_experts() {
        let out = layouts(2, 2);
        for (rank, (local, ep, dp, ep_ranks, dp_ranks)) in out.into_iter().enumerate() {
            assert_eq!((local, ep, dp), (1, 2, 1));
            assert_eq!(ep_ranks, vec![0, 1]);
            assert_eq!(dp_ranks, vec![rank]);
        }
    }

    #[test]
    fn test_four_ranks_two_experts() {
        let out = layouts(4, 2);
        assert_eq!(out[0].2, 2);
        assert_eq!(out[0].3, vec![0, 1]);
        assert_eq!(out[2].3, vec![2, 3]);
        assert_eq!(out[0].4, vec![0, 2]);
        assert_eq!(out[1].4, vec![1, 3]);
        assert_eq!(out[3].4, vec![1, 3]);
    }

    #[test]
    fn test_more_experts_than_ranks() {
        let out = layouts(2, 4);
        assert_eq!(out[0].0, 2);
        assert_eq!(out[0].1, 2);
        assert_eq!(out[0].2, 1);
    }

    #[test]
    fn test_incompatible_expert_count() {
        let ctx = MoeContext::setup(&World::single(), 0, None).unwrap();
        assert!(ctx.get_info(0).is_err());

        let backends = LocalBackend::create_world(4);
        let world = World::init(Arc::new(backends.into_iter().next().unwrap()));
        let ctx = MoeContext::setup(&world, 0, None).unwrap();
        assert!(ctx.get_info(3).is_err());
    }

    #[test]
    fn test_aux_loss_and_seeds() {
        let ctx = MoeContext::setup(&World::single(), 7, None).unwrap();
        ctx.add_loss(0.5);
        ctx.add_loss(0.25);
        assert_eq!(ctx.get_loss(), 0.75);
        ctx.reset_loss();
        assert_eq!(ctx.get_loss(), 0.0);
        assert_eq!(ctx.dense_seed(), 7);
        assert_ne!(ctx.expert_seed(0), ctx.expert_seed(1));
    }
}
