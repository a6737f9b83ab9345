//! Bucket Shard Strategy - One Collective per Bucket
//!
//! Consecutive sharded tensors are packed into buckets of at most
//! `bucket_size` elements per rank. Each bucket is gathered with a single
//! all-gather, and none of its tensors is rebuilt before the whole bucket
//! has arrived.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use tracing::trace;
use zeroshard_distributed::ProcessGroup;

use crate::error::Result;
use crate::sharded_tensor::ShardedTensor;
use crate::strategy::commons::bucket_merge;
use crate::strategy::{shard_local, ShardStrategy};

/// Contiguous equal split gathered in buckets.
#[derive(Debug, Clone, Copy)]
pub struct BucketTensorShardStrategy {
    bucket_size: usize,
}

impl BucketTensorShardStrategy {
    /// Creates the strategy with `bucket_size` elements per rank and bucket.
    pub fn new(bucket_size: usize) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
        }
    }

    /// Returns the bucket size in elements.
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    fn gather_bucket(
        &self,
        tensors: &mut [&mut ShardedTensor],
        group: &ProcessGroup,
    ) -> Result<()> {
        let mut packed = Vec::new();
        for tensor in tensors.iter() {
            packed.extend(tensor.to_f32_vec()?);
        }
        let gathered = group.all_gather(&packed)?;
        let buckets: Vec<Vec<f32>> = if packed.is_empty() {
            vec![Vec::new(); group.size()]
        } else {
            gathered.chunks(packed.len()).map(<[f32]>::to_vec).collect()
        };
        let numels: Vec<usize> = tensors.iter().map(|t| t.origin_numel()).collect();
        trace!(tensors = tensors.len(), elements = packed.len(), "gathered bucket");

        for (tensor, full) in tensors.iter_mut().zip(bucket_merge(&buckets, &numels)?) {
            tensor.assign(&full);
            tensor.set_sharded(false);
        }
        Ok(())
    }
}

impl Default for BucketTensorShardStrategy {
    fn default() -> Self {
        Self::new(1 << 20)
    }
}

impl ShardStrategy for BucketTensorShardStrategy {
    fn name(&self) -> &'static str {
        "bucket"
    }

    fn shard(&self, tensors: &mut [&mut ShardedTensor], group: &ProcessGroup) -> Result<()> {
        for tensor in tensors.iter_mut() {
            shard_local(tensor, group)?;
        }
        Ok(())
    }

    fn gather(&self, tensors: &mut [&mut ShardedTensor], group: &ProcessGroup) -> Result<()> {
        let mut pending: Vec<&mut ShardedTensor> = tensors
            .iter_mut()
            .filter(|t| t.is_sharded())
            .map(|t| &mut **t)
            .collect();

        let mut start = 0;
        while start < pending.len() {
            let mut end = start;
            let mut used = 0;
            // A bucket always takes at least one tensor.
            while end < pending.len()
                && (end == start || used + pending[end].payload_numel() <= self.bucket_size)
            {
                used += pending[end].payload_numel();
                end += 1;
            }
            self.gather_bucket(&mut pending[start..end], group)?;
            start = end;
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
    use std::sync::Arc;
    use std::thread;
    use zeroshard_core::{DType, Device};
    use zeroshard_distributed::LocalBackend;

    fn roundtrip(world_size: usize, bucket_size: usize) {
        let a: Vec<f32> = (0..5).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..9).map(|i| -(i as f32)).collect();
        let results: Vec<(Vec<f32>, Vec<f32>)> = thread::scope(|s| {
            let handles: Vec<_> = LocalBackend::create_world(world_size)
                .into_iter()
                .map(|backend| {
                    let (a, b) = (a.clone(), b.clone());
                    s.spawn(move || {
                        let group = ProcessGroup::new(Arc::new(backend));
                        let strategy = BucketTensorShardStrategy::new(bucket_size);
                        let mut ta = ShardedTensor::from_f32(&a, &[5], DType::F32, Device::Cpu)
                            .unwrap();
                        let mut tb = ShardedTensor::from_f32(&b, &[3, 3], DType::F16, Device::Cpu)
                            .unwrap();
                        strategy.shard(&mut [&mut ta, &mut tb], &group).unwrap();
                        assert!(ta.is_sharded() && tb.is_sharded());
                        strategy.gather(&mut [&mut ta, &mut tb], &group).unwrap();
                        (ta.to_f32_vec().unwrap(), tb.to_f32_vec().unwrap())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (ra, rb) in results {
            assert_eq!(ra, a);
            assert_eq!(rb, b);
        }
    }

    #[test]
    fn test_single_bucket_roundtrip() {
        roundtrip(2, 1 << 10);
    }

    #[test]
    fn test_one_tensor_per_bucket_roundtrip() {
        roundtrip(3, 1);
    }

    #[test]
    fn test_kind_builds_strategy() {
        use crate::strategy::ShardStrategyKind;
        assert_eq!(ShardStrategyKind::Bucket.build(8).name(), "bucket");
        assert_eq!(ShardStrategyKind::Tensor.build(8).name(), "tensor");
    }
}
