//! Shard Strategies - Splitting Payloads Across a Group
//!
//! A strategy turns whole payloads into this rank's shard (`shard`) and back
//! (`gather`). Sharding is local: every member already holds the whole
//! tensor and keeps its own slice. Gathering is collective and must be called
//! by every member of `group` with the same tensors in the same order.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

pub mod bucket;
pub mod commons;
pub mod tensor;

use core::fmt;

use serde::{Deserialize, Serialize};
use zeroshard_distributed::ProcessGroup;

use crate::error::{Result, ZeroError};
use crate::sharded_tensor::ShardedTensor;

pub use bucket::BucketTensorShardStrategy;
pub use commons::{bucket_merge, bucket_split, merge_flat, padded_len, shard_len, split_flat};
pub use tensor::TensorShardStrategy;

// =============================================================================
// ShardStrategy Trait
// =============================================================================

/// Policy for splitting payloads across a process group.
pub trait ShardStrategy: fmt::Debug + Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Replaces each whole payload with this rank's shard.
    ///
    /// Tensors that are already sharded are left untouched.
    fn shard(&self, tensors: &mut [&mut ShardedTensor], group: &ProcessGroup) -> Result<()>;

    /// Replaces each shard with the whole payload.
    ///
    /// Tensors that are not sharded are left untouched.
    fn gather(&self, tensors: &mut [&mut ShardedTensor], group: &ProcessGroup) -> Result<()>;
}

// =============================================================================
// Strategy Selection
// =============================================================================

/// Configuration tag selecting a strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStrategyKind {
    /// One all-gather per tensor.
    #[default]
    Tensor,
    /// One all-gather per bucket of tensors.
    Bucket,
}

impl ShardStrategyKind {
    /// Builds the strategy; `bucket_size` is in elements.
    pub fn build(self, bucket_size: usize) -> Box<dyn ShardStrategy> {
        match self {
            Self::Tensor => Box::new(TensorShardStrategy),
            Self::Bucket => Box::new(BucketTensorShardStrategy::new(bucket_size)),
        }
    }
}

impl fmt::Display for ShardStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor => write!(f, "tensor"),
            Self::Bucket => write!(f, "bucket"),
        }
    }
}

/// Keeps this rank's slice of a whole payload.
pub(crate) fn shard_local(tensor: &mut ShardedTensor, group: &ProcessGroup) -> Result<()> {
    if tensor.is_sharded() {
        return Ok(());
    }
    if tensor.ref_count() > 0 {
        return Err(ZeroError::shard_state(format!(
            "cannot re-shard a payload held by {} users",
            tensor.ref_count()
        )));
    }
    let rank = group.local_rank()?;
    let full = tensor.to_f32_vec()?;
    tensor.assign(&commons::shard_of(&full, group.size(), rank));
    tensor.set_sharded(true);
    Ok(())
}
