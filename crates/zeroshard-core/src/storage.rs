//! Storage - Relocatable Payload Buffers
//!
//! A `Storage` is the payload behind every shard. It is reference-counted so
//! that the engine, the parameter and the optimizer can all hold the same
//! buffer; relocation, release and replacement happen in place and are seen
//! by every holder.
//!
//! # Key Features
//! - Reference-counted payloads shared between parameter and engine
//! - In-place relocation between host and device
//! - Payload release without dropping the handle
//! - Guarded read/write access through `parking_lot` locks
//!
//! # Example
//! ```rust
//! use zeroshard_core::{Storage, Device};
//!
//! let storage = Storage::<f32>::zeros(100, Device::Cpu);
//! assert_eq!(storage.len(), 100);
//! storage.release();
//! assert!(storage.is_empty());
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::Device;
use crate::dtype::Scalar;
use crate::error::{Error, Result};

// =============================================================================
// Storage Struct
// =============================================================================

/// Shared payload buffer with a residency tag.
#[derive(Debug)]
pub struct Storage<T: Scalar> {
    inner: Arc<RwLock<StorageInner<T>>>,
}

/// Inner storage data shared between handles.
#[derive(Debug)]
struct StorageInner<T: Scalar> {
    data: Vec<T>,
    device: Device,
}

impl<T: Scalar> Storage<T> {
    /// Creates new storage with the given length, initialized to zero.
    #[must_use]
    pub fn zeros(len: usize, device: Device) -> Self {
        Self::from_vec(vec![T::zeroed(); len], device)
    }

    /// Creates storage from an existing vector.
    #[must_use]
    pub fn from_vec(data: Vec<T>, device: Device) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StorageInner { data, device })),
        }
    }

    /// Creates storage from a slice by copying the data.
    #[must_use]
    pub fn from_slice(data: &[T], device: Device) -> Self {
        Self::from_vec(data.to_vec(), device)
    }

    /// Returns the number of elements currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    /// Returns true if the payload is empty or has been released.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Returns the device this storage is on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.inner.read().device
    }

    /// Returns the size in bytes of the payload.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.len() * core::mem::size_of::<T>()
    }

    /// Returns true if this storage is uniquely owned (not shared).
    #[must_use]
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Returns true if both handles refer to the same buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns an immutable view of the data.
    #[must_use]
    pub fn as_slice(&self) -> StorageReadGuard<'_, T> {
        StorageReadGuard {
            guard: self.inner.read(),
        }
    }

    /// Returns a mutable view of the data.
    #[must_use]
    pub fn as_slice_mut(&self) -> StorageWriteGuard<'_, T> {
        StorageWriteGuard {
            guard: self.inner.write(),
        }
    }

    /// Returns a copy of the data.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.read().data.clone()
    }

    /// Copies data from another storage into this one.
    pub fn copy_from(&self, other: &Self) -> Result<()> {
        if self.ptr_eq(other) {
            return Ok(());
        }
        let src = other.as_slice();
        self.copy_from_slice(&src)
    }

    /// Copies a slice into this storage. Lengths must match.
    pub fn copy_from_slice(&self, src: &[T]) -> Result<()> {
        let mut dst = self.as_slice_mut();
        if dst.len() != src.len() {
            return Err(Error::shape_mismatch(&[dst.len()], &[src.len()]));
        }
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Makes a deep copy of this storage.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let inner = self.inner.read();
        Self::from_vec(inner.data.clone(), inner.device)
    }

    /// Returns a copy of this storage on `device`.
    ///
    /// When the storage is already on `device` the handle is shared.
    #[must_use]
    pub fn to_device(&self, device: Device) -> Self {
        if self.device() == device {
            return self.clone();
        }
        let data = self.to_vec();
        Self::from_vec(data, device)
    }

    /// Moves the payload to `device` in place; every holder sees the move.
    pub fn relocate(&self, device: Device) {
        self.inner.write().device = device;
    }

    /// Replaces the payload, keeping the residency tag.
    pub fn replace(&self, data: Vec<T>) {
        self.inner.write().data = data;
    }

    /// Takes the payload out, leaving the storage empty.
    #[must_use]
    pub fn take(&self) -> Vec<T> {
        core::mem::take(&mut self.inner.write().data)
    }

    /// Frees the payload memory. The handle stays valid and reports empty.
    pub fn release(&self) {
        let mut inner = self.inner.write();
        inner.data = Vec::new();
    }

    /// Fails with `PayloadReleased` when the payload has been freed.
    pub fn ensure_present(&self, expected: usize) -> Result<()> {
        let len = self.len();
        if len == 0 && expected > 0 {
            return Err(Error::PayloadReleased);
        }
        if len != expected {
            return Err(Error::shape_mismatch(&[expected], &[len]));
        }
        Ok(())
    }
}

impl<T: Scalar> Clone for Storage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// =============================================================================
// Guard Types for Safe Access
// =============================================================================

/// Read guard for storage data.
pub struct StorageReadGuard<'a, T: Scalar> {
    guard: parking_lot::RwLockReadGuard<'a, StorageInner<T>>,
}

impl<T: Scalar> Deref for StorageReadGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.guard.data
    }
}

/// Write guard for storage data.
pub struct StorageWriteGuard<'a, T: Scalar> {
    guard: parking_lot::RwLockWriteGuard<'a, StorageInner<T>>,
}

impl<T: Scalar> Deref for StorageWriteGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.guard.data
    }
}

impl<T: Scalar> DerefMut for StorageWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.data
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_storage_zeros() {
        let storage = Storage::<f32>::zeros(10, Device::Cpu);
        assert_eq!(storage.len(), 10);
        assert!(storage.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_storage_clone_shares() {
        let storage1 = Storage::<f32>::zeros(10, Device::Cpu);
        let storage2 = storage1.clone();

        assert!(!storage1.is_unique());
        assert!(storage1.ptr_eq(&storage2));
        storage2.as_slice_mut()[0] = 7.0;
        assert_eq!(storage1.as_slice()[0], 7.0);
    }

    #[test]
    fn test_storage_deep_copy() {
        let storage1 = Storage::from_vec(vec![1.0_f32, 2.0, 3.0], Device::Cpu);
        let storage2 = storage1.deep_copy();
        storage2.as_slice_mut()[0] = 99.0;
        assert_eq!(storage1.as_slice()[0], 1.0);
    }

    #[test]
    fn test_relocate_is_seen_by_all_holders() {
        let storage = Storage::<f16>::zeros(4, Device::Cpu);
        let alias = storage.clone();
        storage.relocate(Device::Cuda(0));
        assert_eq!(alias.device(), Device::Cuda(0));
        assert_eq!(alias.len(), 4);
    }

    #[test]
    fn test_to_device_copies() {
        let storage = Storage::from_vec(vec![1.0_f32, 2.0], Device::Cpu);
        let moved = storage.to_device(Device::Cuda(1));
        assert!(!moved.ptr_eq(&storage));
        assert_eq!(moved.device(), Device::Cuda(1));
        assert_eq!(storage.device(), Device::Cpu);
    }

    #[test]
    fn test_release_and_replace() {
        let storage = Storage::from_vec(vec![1.0_f32, 2.0, 3.0], Device::Cpu);
        storage.release();
        assert!(storage.is_empty());
        assert_eq!(storage.size_bytes(), 0);
        assert_eq!(storage.ensure_present(3), Err(Error::PayloadReleased));

        storage.replace(vec![4.0, 5.0, 6.0]);
        assert!(storage.ensure_present(3).is_ok());
        assert_eq!(storage.to_vec(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_take_leaves_empty() {
        let storage = Storage::from_vec(vec![1.0_f32, 2.0], Device::Cpu);
        let data = storage.take();
        assert_eq!(data, vec![1.0, 2.0]);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_storage_copy_from_length_mismatch() {
        let src = Storage::from_vec(vec![1.0_f32, 2.0, 3.0], Device::Cpu);
        let dst = Storage::<f32>::zeros(2, Device::Cpu);
        assert!(dst.copy_from(&src).is_err());

        let dst = Storage::<f32>::zeros(3, Device::Cpu);
        dst.copy_from(&src).unwrap();
        assert_eq!(&*dst.as_slice(), &[1.0, 2.0, 3.0]);
    }
}
