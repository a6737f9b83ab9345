//! `ProcessGroup` - Process Group Abstraction
//!
//! A `ProcessGroup` is a sorted list of global ranks plus a handle to the
//! backend. Sharded parameters gather and scatter through the group they
//! were sharded over: the data-parallel group for dense parameters, the
//! expert replica group for expert parameters.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, LocalBackend, ReduceOp};
use crate::error::{DistributedError, Result};

// =============================================================================
// ProcessGroup
// =============================================================================

/// A group of processes that can communicate with each other.
#[derive(Clone)]
pub struct ProcessGroup {
    backend: Arc<dyn Backend>,
    ranks: Vec<usize>,
}

impl ProcessGroup {
    /// Creates a new process group with all ranks.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let world_size = backend.world_size();
        Self {
            backend,
            ranks: (0..world_size).collect(),
        }
    }

    /// Creates a process group with specific ranks.
    pub fn with_ranks(backend: Arc<dyn Backend>, mut ranks: Vec<usize>) -> Result<Self> {
        ranks.sort_unstable();
        ranks.dedup();
        let world_size = backend.world_size();
        if let Some(&bad) = ranks.iter().find(|&&r| r >= world_size) {
            return Err(DistributedError::InvalidRank {
                rank: bad,
                world_size,
            });
        }
        Ok(Self { backend, ranks })
    }

    /// Creates a single-rank group for tests and non-distributed runs.
    #[must_use]
    pub fn single() -> Self {
        Self::new(Arc::new(LocalBackend::single()))
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Returns the global rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.backend.rank()
    }

    /// Returns this process's index inside the group, if it is a member.
    #[must_use]
    pub fn rank_in_group(&self) -> Option<usize> {
        self.ranks.iter().position(|&r| r == self.rank())
    }

    /// Returns this process's index inside the group, failing if not a member.
    pub fn local_rank(&self) -> Result<usize> {
        self.rank_in_group()
            .ok_or_else(|| DistributedError::NotInGroup {
                rank: self.rank(),
                ranks: self.ranks.clone(),
            })
    }

    /// Returns the world size.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.backend.world_size()
    }

    /// Returns the number of processes in this group.
    #[must_use]
    pub fn size(&self) -> usize {
        self.ranks.len()
    }

    /// Returns the ranks in this group.
    #[must_use]
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Checks if `rank` is part of the group.
    #[must_use]
    pub fn contains(&self, rank: usize) -> bool {
        self.ranks.contains(&rank)
    }

    /// Returns the global rank of the group's first member.
    #[must_use]
    pub fn first_rank(&self) -> usize {
        self.ranks.first().copied().unwrap_or(0)
    }

    // =========================================================================
    // Collectives
    // =========================================================================

    /// Synchronizes all processes in the group.
    pub fn barrier(&self) -> Result<()> {
        self.backend.barrier(&self.ranks)
    }

    /// All-reduces `data` in place.
    pub fn all_reduce(&self, data: &mut [f32], op: ReduceOp) -> Result<()> {
        self.backend.all_reduce(&self.ranks, data, op)
    }

    /// Broadcasts `data` from the member with global rank `src`.
    pub fn broadcast(&self, data: &mut [f32], src: usize) -> Result<()> {
        self.backend.broadcast(&self.ranks, data, src)
    }

    /// Gathers every member's `send`, concatenated in group order.
    pub fn all_gather(&self, send: &[f32]) -> Result<Vec<f32>> {
        let mut recv = vec![0.0; send.len() * self.size()];
        self.backend.all_gather(&self.ranks, send, &mut recv)?;
        Ok(recv)
    }

    /// Reduces `send` and returns this member's equal-sized chunk.
    pub fn reduce_scatter(&self, send: &[f32], op: ReduceOp) -> Result<Vec<f32>> {
        let size = self.size();
        if send.len() % size != 0 {
            return Err(DistributedError::LengthMismatch {
                expected: send.len().next_multiple_of(size),
                actual: send.len(),
            });
        }
        let mut recv = vec![0.0; send.len() / size];
        self.backend
            .reduce_scatter(&self.ranks, send, &mut recv, op)?;
        Ok(recv)
    }
}

impl fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("backend", &self.backend.name())
            .field("rank", &self.rank())
            .field("ranks", &self.ranks)
            .finish()
    }
}

// =============================================================================
// World
// =============================================================================

/// Global distributed world as seen by one rank.
#[derive(Clone, Debug)]
pub struct World {
    default_group: ProcessGroup,
}

impl World {
    /// Initializes the distributed world.
    pub fn init(backend: Arc<dyn Backend>) -> Self {
        Self {
            default_group: ProcessGroup::new(backend),
        }
    }

    /// Creates a single-rank world.
    #[must_use]
    pub fn single() -> Self {
        Self {
            default_group: ProcessGroup::single(),
        }
    }

    /// Returns the default process group.
    #[must_use]
    pub fn default_group(&self) -> &ProcessGroup {
        &self.default_group
    }

    /// Returns the rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.default_group.rank()
    }

    /// Returns the world size.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.default_group.world_size()
    }

    /// Checks if this is the main process (rank 0).
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.rank() == 0
    }

    /// Synchronizes all processes.
    pub fn barrier(&self) -> Result<()> {
        self.default_group.barrier()
    }

    /// Creates a new process group with specific ranks.
    pub fn new_group(&self, ranks: Vec<usize>) -> Result<ProcessGroup> {
        ProcessGroup::with_ranks(Arc::clone(&self.default_group.backend), ranks)
    }
}

// =============================================================================
// Tests
// =============================================================================
