//! Gradient Bucket - Coalesced Reduction Buffers
//!
//! Many small gradients are packed into one flat buffer so that a single
//! all-reduce serves all of them.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use crate::backend::ReduceOp;
use crate::error::Result;
use crate::process_group::ProcessGroup;

/// Default bucket capacity in elements (~100MB of f32).
pub const DEFAULT_BUCKET_CAPACITY: usize = 25_000_000;

// =============================================================================
// GradientBucket
// =============================================================================

/// A bucket for accumulating gradients before all-reduce.
#[derive(Debug, Clone)]
pub struct GradientBucket {
    /// Flattened gradient data.
    data: Vec<f32>,
    /// Length of each packed buffer, in packing order.
    sizes: Vec<usize>,
    /// Capacity in number of elements.
    capacity: usize,
}

impl GradientBucket {
    /// Creates a new gradient bucket.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            sizes: Vec::new(),
            capacity,
        }
    }

    /// Checks if the bucket is full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Checks if the bucket is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Returns the number of packed elements.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Packs a buffer. An empty bucket accepts any buffer, even an oversized one.
    pub fn add(&mut self, values: &[f32]) -> bool {
        if !self.is_empty() && self.data.len() + values.len() > self.capacity {
            return false;
        }
        self.sizes.push(values.len());
        self.data.extend_from_slice(values);
        true
    }

    /// Returns the flattened data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns mutable flattened data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Clears the bucket.
    pub fn clear(&mut self) {
        self.data.clear();
        self.sizes.clear();
    }

    /// Splits the flat data back into the packed buffers.
    #[must_use]
    pub fn extract(&self) -> Vec<Vec<f32>> {
        let mut result = Vec::with_capacity(self.sizes.len());
        let mut offset = 0;
        for &size in &self.sizes {
            result.push(self.data[offset..offset + size].to_vec());
            offset += size;
        }
        result
    }

    /// Sums the bucket over `group` and divides by the group size.
    pub fn all_reduce_mean(&mut self, group: &ProcessGroup) -> Result<()> {
        if self.is_empty() || group.size() == 1 {
            return Ok(());
        }
        group.all_reduce(&mut self.data, ReduceOp::Sum)?;
        let scale = 1.0 / group.size() as f32;
        for v in &mut self.data {
            *v *= scale;
        }
        Ok(())
    }
}

impl Default for GradientBucket {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_bucket() {
        let mut bucket = GradientBucket::new(100);
        assert!(bucket.is_empty());
        assert!(bucket.add(&[1.0, 2.0, 3.0]));
        assert!(!bucket.is_empty());
        assert_eq!(bucket.size(), 3);
    }

    #[test]
    fn test_gradient_bucket_extract() {
        let mut bucket = GradientBucket::new(100);
        bucket.add(&[1.0, 2.0]);
        bucket.add(&[3.0, 4.0, 5.0]);
        let parts = bucket.extract();
        assert_eq!(parts, vec![vec![1.0, 2.0], vec![3.0, 4.0, 5.0]]);
    }

    #[test]
    fn test_gradient_bucket_full() {
        let mut bucket = GradientBucket::new(5);
        assert!(bucket.add(&[1.0, 2.0, 3.0]));
        assert!(!bucket.add(&[4.0, 5.0, 6.0]));
        bucket.clear();
        assert!(bucket.add(&[0.0; 8]));
        assert!(bucket.is_full());
    }

    #[test]
    fn test_single_rank_mean_is_identity() {
        let mut bucket = GradientBucket::new(10);
        bucket.add(&[2.0, 4.0]);
        bucket.all_reduce_mean(&ProcessGroup::single()).unwrap();
        assert_eq!(bucket.data(), &[2.0, 4.0]);
    }
}
