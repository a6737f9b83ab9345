//! Shard Arithmetic - Pure Split and Merge Functions
//!
//! A tensor of `numel` elements split over `n` ranks gives every rank
//! `ceil(numel / n)` elements; the last rank's slice is zero-padded. Merging
//! concatenates the slices in rank order and strips the padding.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use crate::error::{Result, ZeroError};

/// Elements per rank for `numel` elements over `n` ranks.
pub fn shard_len(numel: usize, n: usize) -> usize {
    numel.div_ceil(n.max(1))
}

/// Padded element count, `shard_len(numel, n) * n`.
pub fn padded_len(numel: usize, n: usize) -> usize {
    shard_len(numel, n) * n.max(1)
}

/// Returns `data` zero-padded to `padded_len(data.len(), n)`.
pub fn pad_flat<T: Copy + Default>(data: &[T], n: usize) -> Vec<T> {
    let mut padded = data.to_vec();
    padded.resize(padded_len(data.len(), n), T::default());
    padded
}

/// Splits `data` into `n` equal contiguous slices, zero-padding the last.
pub fn split_flat<T: Copy + Default>(data: &[T], n: usize) -> Vec<Vec<T>> {
    let len = shard_len(data.len(), n);
    let padded = pad_flat(data, n);
    if len == 0 {
        return vec![Vec::new(); n.max(1)];
    }
    padded.chunks(len).map(<[T]>::to_vec).collect()
}

/// Returns rank `rank`'s slice of `data` split over `n` ranks.
pub fn shard_of<T: Copy + Default>(data: &[T], n: usize, rank: usize) -> Vec<T> {
    let len = shard_len(data.len(), n);
    let start = (rank * len).min(data.len());
    let end = ((rank + 1) * len).min(data.len());
    let mut shard = data[start..end].to_vec();
    shard.resize(len, T::default());
    shard
}

/// Concatenates equal-length `shards` and truncates to `numel`.
pub fn merge_flat<T: Copy>(shards: &[Vec<T>], numel: usize) -> Result<Vec<T>> {
    let total: usize = shards.iter().map(Vec::len).sum();
    let equal = shards.windows(2).all(|w| w[0].len() == w[1].len());
    if total < numel || !equal {
        return Err(ZeroError::shard_state(format!(
            "cannot merge {} shards of {total} elements into {numel}",
            shards.len()
        )));
    }
    let mut merged: Vec<T> = shards.iter().flatten().copied().collect();
    merged.truncate(numel);
    Ok(merged)
}

/// Splits several tensors at once: bucket `r` is the concatenation of every
/// tensor's rank-`r` slice, in tensor order.
pub fn bucket_split<T: Copy + Default>(tensors: &[&[T]], n: usize) -> Vec<Vec<T>> {
    let mut buckets = vec![Vec::new(); n.max(1)];
    for tensor in tensors {
        for (bucket, slice) in buckets.iter_mut().zip(split_flat(tensor, n)) {
            bucket.extend(slice);
        }
    }
    buckets
}

/// Inverse of `bucket_split`, given each tensor's element count.
pub fn bucket_merge<T: Copy>(buckets: &[Vec<T>], numels: &[usize]) -> Result<Vec<Vec<T>>> {
    let n = buckets.len().max(1);
    let expected: usize = numels.iter().map(|&m| shard_len(m, n)).sum();
    if buckets.iter().any(|b| b.len() != expected) {
        return Err(ZeroError::shard_state(format!(
            "bucket length does not match {expected} elements per rank"
        )));
    }

    let mut tensors = Vec::with_capacity(numels.len());
    let mut offset = 0;
    for &m in numels {
        let len = shard_len(m, n);
        let slices: Vec<Vec<T>> = buckets
            .iter()
            .map(|b| b[offset..offset + len].to_vec())
            .collect();
        tensors.push(merge_flat(&slices, m)?);
        offset += len;
    }
    Ok(tensors)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pads_last_slice() {
        let shards = split_flat(&[1.0f32, 2.0, 3.0, 4.0, 5.0], 2);
        assert_eq!(shards, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 0.0]]);
    }

    #[test]
    fn test_roundtrip_for_many_sizes() {
        for n in 1..=5 {
            for numel in [0usize, 1, 2, 7, 16, 33] {
                let data: Vec<f32> = (0..numel).map(|i| i as f32).collect();
                let shards = split_flat(&data, n);
                assert_eq!(shards.len(), n);
                let total: usize = shards.iter().map(Vec::len).sum();
                assert_eq!(total, padded_len(numel, n));
                assert_eq!(merge_flat(&shards, numel).unwrap(), data);
                for (rank, shard) in shards.iter().enumerate() {
                    assert_eq!(&shard_of(&data, n, rank), shard);
                }
            }
        }
    }

    #[test]
    fn test_more_ranks_than_elements() {
        let shards = split_flat(&[9.0f32], 3);
        assert_eq!(shards, vec![vec![9.0], vec![0.0], vec![0.0]]);
        assert_eq!(shard_of(&[9.0f32], 3, 2), vec![0.0]);
    }

    #[test]
    fn test_merge_rejects_ragged_shards() {
        assert!(merge_flat(&[vec![1.0f32, 2.0], vec![3.0]], 3).is_err());
        assert!(merge_flat(&[vec![1.0f32], vec![2.0]], 3).is_err());
    }

    #[test]
    fn test_bucket_roundtrip() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [4.0f32, 5.0, 6.0, 7.0, 8.0];
        let buckets = bucket_split(&[&a, &b], 2);
        assert_eq!(buckets[0], vec![1.0, 2.0, 4.0, 5.0, 6.0]);
        assert_eq!(buckets[1], vec![3.0, 0.0, 7.0, 8.0, 0.0]);
        let merged = bucket_merge(&buckets, &[3, 5]).unwrap();
        assert_eq!(merged, vec![a.to_vec(), b.to_vec()]);
    }

    #[test]
    fn test_bucket_merge_rejects_wrong_length() {
        assert!(bucket_merge(&[vec![1.0f32], vec![2.0, 3.0]], &[2]).is_err());
    }
}
