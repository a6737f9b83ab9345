//! Tensor Shard Strategy - One Collective per Tensor
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use zeroshard_distributed::ProcessGroup;

use crate::error::Result;
use crate::sharded_tensor::ShardedTensor;
use crate::strategy::commons::merge_flat;
use crate::strategy::{shard_local, ShardStrategy};

/// Contiguous equal split; each tensor is gathered on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct TensorShardStrategy;

impl ShardStrategy for TensorShardStrategy {
    fn name(&self) -> &'static str {
        "tensor"
    }

    fn shard(&self, tensors: &mut [&mut ShardedTensor], group: &ProcessGroup) -> Result<()> {
        for tensor in tensors.iter_mut() {
            shard_local(tensor, group)?;
        }
        Ok(())
    }

    fn gather(&self, tensors: &mut [&mut ShardedTensor], group: &ProcessGroup) -> Result<()> {
        for tensor in tensors.iter_mut() {
            if !tensor.is_sharded() {
                continue;
            }
            let shard = tensor.to_f32_vec()?;
            let gathered = group.all_gather(&shard)?;
            let shards: Vec<Vec<f32>> = gathered
                .chunks(shard.len().max(1))
                .map(<[f32]>::to_vec)
                .collect();
            let full = if shard.is_empty() {
                Vec::new()
            } else {
                merge_flat(&shards, tensor.origin_numel())?
            };
            tensor.assign(&full);
            tensor.set_sharded(false);
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

    #[test]
    fn test_single_rank_is_identity() {
        let group = ProcessGroup::single();
        let mut t = ShardedTensor::from_f32(&[1.0, 2.0, 3.0], &[3], DType::F32, Device::Cpu).unwrap();
        TensorShardStrategy.shard(&mut [&mut t], &group).unwrap();
        assert!(t.is_sharded());
        assert_eq!(t.payload_numel(), 3);
        TensorShardStrategy.gather(&mut [&mut t], &group).unwrap();
        assert!(!t.is_sharded());
        assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_three_rank_roundtrip() {
        let data: Vec<f32> = (0..7).map(|i| i as f32 * 0.5).collect();
        let results: Vec<(usize, Vec<f32>)> = thread::scope(|s| {
            let handles: Vec<_> = LocalBackend::create_world(3)
                .into_iter()
                .map(|b| {
                    let data = data.clone();
                    s.spawn(move || {
                        let group = ProcessGroup::new(Arc::new(b));
                        let mut t =
                            ShardedTensor::from_f32(&data, &[7], DType::F16, Device::Cuda(0))
                                .unwrap();
                        TensorShardStrategy.shard(&mut [&mut t], &group).unwrap();
                        let shard_numel = t.payload_numel();
                        TensorShardStrategy.gather(&mut [&mut t], &group).unwrap();
                        (shard_numel, t.to_f32_vec().unwrap())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (shard_numel, full) in results {
            assert_eq!(shard_numel, 3);
            assert_eq!(full, data);
        }
    }
}
