//! Sharded Tensor - Payload Handle with Shard Metadata
//!
//! A `ShardedTensor` owns one payload (a parameter's compute copy or a saved
//! gradient) together with what the engine needs to know about it: the
//! logical shape, whether the payload currently holds one rank's shard or
//! the whole tensor, where it lives, its lifecycle state and how many users
//! currently hold it.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use core::fmt;

use half::f16;
use zeroshard_core::{DType, Device, Scalar, Storage};
use zeroshard_tensor::shape::numel;

use crate::error::{Result, ZeroError};

// =============================================================================
// Payload
// =============================================================================

/// Precision-tagged payload storage.
#[derive(Debug)]
pub enum Payload {
    /// Half-precision values.
    F16(Storage<f16>),
    /// Single-precision values.
    F32(Storage<f32>),
}

fn to_storage<T: Scalar>(values: &[f32], device: Device) -> Storage<T> {
    Storage::from_vec(values.iter().map(|&v| T::from_f32(v)).collect(), device)
}

impl Payload {
    /// Builds a payload of `dtype` from f32 values.
    pub fn from_f32(values: &[f32], dtype: DType, device: Device) -> Self {
        match dtype {
            DType::F16 => Self::F16(to_storage(values, device)),
            DType::F32 => Self::F32(to_storage(values, device)),
        }
    }

    /// Returns the payload precision.
    pub fn dtype(&self) -> DType {
        match self {
            Self::F16(_) => DType::F16,
            Self::F32(_) => DType::F32,
        }
    }

    /// Returns the residency.
    pub fn device(&self) -> Device {
        match self {
            Self::F16(s) => s.device(),
            Self::F32(s) => s.device(),
        }
    }

    /// Returns the number of elements held.
    pub fn len(&self) -> usize {
        match self {
            Self::F16(s) => s.len(),
            Self::F32(s) => s.len(),
        }
    }

    /// Returns true when no elements are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bytes held.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::F16(s) => s.size_bytes(),
            Self::F32(s) => s.size_bytes(),
        }
    }

    /// Reads the values widened to f32.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Self::F16(s) => s.as_slice().iter().map(|v| v.into_f32()).collect(),
            Self::F32(s) => s.to_vec(),
        }
    }

    /// Replaces the values, keeping precision and residency.
    pub fn assign(&self, values: &[f32]) {
        match self {
            Self::F16(s) => s.replace(values.iter().map(|&v| f16::from_f32(v)).collect()),
            Self::F32(s) => s.replace(values.to_vec()),
        }
    }

    /// Moves the payload in place.
    pub fn relocate(&self, device: Device) {
        match self {
            Self::F16(s) => s.relocate(device),
            Self::F32(s) => s.relocate(device),
        }
    }

    /// Frees the values; the handle stays valid.
    pub fn release(&self) {
        match self {
            Self::F16(s) => s.release(),
            Self::F32(s) => s.release(),
        }
    }

    /// Moves the buffer out into a new payload, leaving this one empty.
    pub fn take(&self) -> Self {
        match self {
            Self::F16(s) => Self::F16(Storage::from_vec(s.take(), s.device())),
            Self::F32(s) => Self::F32(Storage::from_vec(s.take(), s.device())),
        }
    }

    /// Returns true when both payloads share a buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::F16(a), Self::F16(b)) => a.ptr_eq(b),
            (Self::F32(a), Self::F32(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Copies the payload into a fresh buffer of `dtype` on `device`.
    pub fn cast(&self, dtype: DType, device: Device) -> Self {
        Self::from_f32(&self.to_f32_vec(), dtype, device)
    }
}

// =============================================================================
// Tensor State
// =============================================================================

/// Lifecycle state of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorState {
    /// No payload.
    Free,
    /// In use by forward or backward compute.
    Compute,
    /// Resting between uses.
    Hold,
    /// Resting after forward, before backward.
    HoldAfterFwd,
    /// Resting after backward, before the optimizer step.
    HoldAfterBwd,
}

impl fmt::Display for TensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "FREE",
            Self::Compute => "COMPUTE",
            Self::Hold => "HOLD",
            Self::HoldAfterFwd => "HOLD_AFTER_FWD",
            Self::HoldAfterBwd => "HOLD_AFTER_BWD",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// ShardedTensor
// =============================================================================

/// A payload plus shard metadata.
#[derive(Debug)]
pub struct ShardedTensor {
    payload: Payload,
    origin_shape: Vec<usize>,
    is_sharded: bool,
    state: TensorState,
    ref_count: usize,
}

impl ShardedTensor {
    /// Wraps the full tensor `values` of `shape`.
    pub fn from_f32(values: &[f32], shape: &[usize], dtype: DType, device: Device) -> Result<Self> {
        if values.len() != numel(shape) {
            return Err(zeroshard_core::Error::shape_mismatch(shape, &[values.len()]).into());
        }
        Ok(Self::from_payload(Payload::from_f32(values, dtype, device), shape, false))
    }

    /// Wraps an existing payload.
    pub fn from_payload(payload: Payload, shape: &[usize], is_sharded: bool) -> Self {
        let state = if payload.is_empty() && numel(shape) > 0 {
            TensorState::Free
        } else {
            TensorState::Hold
        };
        Self {
            payload,
            origin_shape: shape.to_vec(),
            is_sharded,
            state,
            ref_count: 0,
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Returns the logical shape.
    pub fn origin_shape(&self) -> &[usize] {
        &self.origin_shape
    }

    /// Returns the logical element count.
    pub fn origin_numel(&self) -> usize {
        numel(&self.origin_shape)
    }

    /// Returns true while the payload holds one rank's shard.
    pub fn is_sharded(&self) -> bool {
        self.is_sharded
    }

    /// Marks the payload as a shard or as the whole tensor.
    pub fn set_sharded(&mut self, is_sharded: bool) {
        self.is_sharded = is_sharded;
    }

    /// Returns the payload precision.
    pub fn dtype(&self) -> DType {
        self.payload.dtype()
    }

    /// Returns the residency.
    pub fn device(&self) -> Device {
        self.payload.device()
    }

    /// Returns the elements currently held.
    pub fn payload_numel(&self) -> usize {
        self.payload.len()
    }

    /// Returns the bytes currently held.
    pub fn payload_size_bytes(&self) -> usize {
        self.payload.size_bytes()
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns true when the payload has been released.
    pub fn is_released(&self) -> bool {
        self.payload.is_empty() && self.origin_numel() > 0
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Returns the lifecycle state.
    pub fn state(&self) -> TensorState {
        self.state
    }

    /// Moves to `state`. A released payload can only be `Free`.
    pub fn trans_state(&mut self, state: TensorState) -> Result<()> {
        if state != TensorState::Free && self.is_released() {
            return Err(ZeroError::shard_state(format!(
                "cannot move a released payload to {state}"
            )));
        }
        self.state = state;
        Ok(())
    }

    /// Returns how many users currently hold the payload.
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Registers a user.
    pub fn inc_ref(&mut self) {
        self.ref_count += 1;
    }

    /// Unregisters a user.
    pub fn dec_ref(&mut self) -> Result<()> {
        self.ref_count = self
            .ref_count
            .checked_sub(1)
            .ok_or_else(|| ZeroError::shard_state("reference count underflow"))?;
        Ok(())
    }

    // =========================================================================
    // Payload Access
    // =========================================================================

    /// Reads the payload widened to f32.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        if self.is_released() {
            return Err(zeroshard_core::Error::PayloadReleased.into());
        }
        Ok(self.payload.to_f32_vec())
    }

    /// Replaces the payload values, keeping precision and residency.
    pub fn assign(&mut self, values: &[f32]) {
        self.payload.assign(values);
        if self.state == TensorState::Free && !self.is_released() {
            self.state = TensorState::Hold;
        }
    }

    /// Replaces the payload with a new one.
    pub fn reset_payload(&mut self, payload: Payload) {
        self.payload = payload;
        self.state = if self.is_released() {
            TensorState::Free
        } else {
            TensorState::Hold
        };
    }

    /// Moves the payload out, leaving this handle released.
    pub fn take_payload(&mut self) -> Result<Payload> {
        if self.ref_count > 0 {
            return Err(ZeroError::shard_state(format!(
                "payload is held by {} users",
                self.ref_count
            )));
        }
        let payload = self.payload.take();
        self.state = TensorState::Free;
        Ok(payload)
    }

    /// Moves the payload in place.
    pub fn relocate(&self, device: Device) {
        self.payload.relocate(device);
    }

    /// Frees the payload.
    pub fn release(&mut self) -> Result<()> {
        if self.ref_count > 0 {
            return Err(ZeroError::shard_state(format!(
                "cannot release a payload held by {} users",
                self.ref_count
            )));
        }
        self.payload.release();
        self.state = TensorState::Free;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
