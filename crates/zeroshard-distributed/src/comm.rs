//! Communication - High-level Communication Utilities
//!
//! Tensor-level and coalesced helpers layered over `ProcessGroup`.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use zeroshard_tensor::Tensor;

use crate::backend::ReduceOp;
use crate::bucket::GradientBucket;
use crate::error::Result;
use crate::process_group::ProcessGroup;

// =============================================================================
// All-Reduce Operations
// =============================================================================

/// Performs all-reduce sum on a tensor, in place.
pub fn all_reduce_sum(tensor: &Tensor, pg: &ProcessGroup) -> Result<()> {
    let mut data = tensor.storage().as_slice_mut();
    pg.all_reduce(&mut data, ReduceOp::Sum)
}

/// Performs all-reduce mean on a tensor, in place.
pub fn all_reduce_mean(tensor: &Tensor, pg: &ProcessGroup) -> Result<()> {
    let mut data = tensor.storage().as_slice_mut();
    pg.all_reduce(&mut data, ReduceOp::Average)
}

/// Sums a scalar across the group.
pub fn all_reduce_scalar(value: f32, pg: &ProcessGroup) -> Result<f32> {
    let mut buf = [value];
    pg.all_reduce(&mut buf, ReduceOp::Sum)?;
    Ok(buf[0])
}

/// Averages many buffers with one all-reduce per bucket of `capacity` elements.
pub fn all_reduce_coalesced_mean(
    buffers: &mut [Vec<f32>],
    pg: &ProcessGroup,
    capacity: usize,
) -> Result<()> {
    if pg.size() == 1 {
        return Ok(());
    }

    let mut start = 0;
    while start < buffers.len() {
        let mut bucket = GradientBucket::new(capacity);
        let mut end = start;
        while end < buffers.len() && bucket.add(&buffers[end]) {
            end += 1;
        }
        bucket.all_reduce_mean(pg)?;
        for (dst, src) in buffers[start..end].iter_mut().zip(bucket.extract()) {
            *dst = src;
        }
        start = end;
    }
    Ok(())
}

// =============================================================================
// Broadcast Operations
// =============================================================================

/// Broadcasts a tensor from the group's first member, in place.
pub fn broadcast_from_first(tensor: &Tensor, pg: &ProcessGroup) -> Result<()> {
    let mut data = tensor.storage().as_slice_mut();
    pg.broadcast(&mut data, pg.first_rank())
}

/// Returns true when every member holds bit-identical `values`.
pub fn equal_in_group(values: &[f32], pg: &ProcessGroup) -> Result<bool> {
    let gathered = pg.all_gather(values)?;
    if values.is_empty() {
        return Ok(true);
    }
    Ok(gathered
        .chunks(values.len())
        .all(|other| other.iter().zip(values).all(|(a, b)| a.to_bits() == b.to_bits())))
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Checks if this is the main process (rank 0).
#[must_use]
pub fn is_main_process(pg: &ProcessGroup) -> bool {
    pg.rank() == 0
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_rank_helpers() {
        let pg = ProcessGroup::single();
        let tensor = Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        all_reduce_sum(&tensor, &pg).unwrap();
        all_reduce_mean(&tensor, &pg).unwrap();
        broadcast_from_first(&tensor, &pg).unwrap();
        assert_eq!(tensor.to_vec(), vec![1.0, 2.0, 3.0]);
        assert!(is_main_process(&pg));
    }

    #[test]
    fn test_coalesced_mean_across_buckets() {
        let backends = LocalBackend::create_world(2);
        let results: Vec<Vec<Vec<f32>>> = thread::scope(|s| {
            let handles: Vec<_> = backends
                .into_iter()
                .map(|b| {
                    s.spawn(move || {
                        let pg = ProcessGroup::new(Arc::new(b));
                        let r = pg.rank() as f32;
                        let mut buffers = vec![vec![r; 3], vec![r * 2.0; 2], vec![r; 4]];
                        all_reduce_coalesced_mean(&mut buffers, &pg, 5).unwrap();
                        buffers
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0][0], vec![0.5; 3]);
        assert_eq!(results[0][1], vec![1.0; 2]);
        assert_eq!(results[0][2], vec![0.5; 4]);
    }

    #[test]
    fn test_all_reduce_scalar() {
        let backends = LocalBackend::create_world(3);
        let totals: Vec<f32> = thread::scope(|s| {
            let handles: Vec<_> = backends
                .into_iter()
                .map(|b| {
                    s.spawn(move || {
                        let pg = ProcessGroup::new(Arc::new(b));
                        all_reduce_scalar(pg.rank() as f32, &pg).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(totals, vec![3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_equal_in_group() {
        let backends = LocalBackend::create_world(2);
        let verdicts: Vec<(bool, bool)> = thread::scope(|s| {
            let handles: Vec<_> = backends
                .into_iter()
                .map(|b| {
                    s.spawn(move || {
                        let pg = ProcessGroup::new(Arc::new(b));
                        let same = equal_in_group(&[1.0, 2.0], &pg).unwrap();
                        let differ = equal_in_group(&[pg.rank() as f32], &pg).unwrap();
                        (same, differ)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(verdicts, vec![(true, false), (true, false)]);
    }
}
