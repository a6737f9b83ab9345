//! Data Types - Compute and Master Precision
//!
//! Shards are stored either in half precision (the compute copy used by
//! forward/backward) or in single precision (gradients when the compute
//! shard is not reused, and the optimizer's master copy). The `Scalar`
//! trait is the bridge between the two.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use core::fmt::Debug;

use bytemuck::{Pod, Zeroable};
use half::f16;
use num_traits::Float as NumFloat;
use serde::{Deserialize, Serialize};

// =============================================================================
// DType Enum
// =============================================================================

/// Runtime representation of payload precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 16-bit floating point (half precision).
    F16,
    /// 32-bit floating point (single precision).
    F32,
}

impl DType {
    /// Returns the size in bytes of this data type.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::F16 => 2,
            Self::F32 => 4,
        }
    }

    /// Returns true for reduced-precision types.
    #[must_use]
    pub const fn is_half(self) -> bool {
        matches!(self, Self::F16)
    }

    /// Returns the name of this data type as a string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::F32 => "f32",
        }
    }
}

impl Default for DType {
    fn default() -> Self {
        Self::F32
    }
}

impl core::fmt::Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Scalar Trait
// =============================================================================

/// Element type of a shard payload.
pub trait Scalar: NumFloat + Debug + Default + Send + Sync + Pod + Zeroable + 'static {
    /// The runtime dtype for this scalar type.
    const DTYPE: DType;

    /// Converts from single precision, rounding to nearest.
    fn from_f32(value: f32) -> Self;

    /// Widens to single precision.
    fn into_f32(self) -> f32;

    /// Returns the dtype for this type.
    #[must_use]
    fn dtype() -> DType {
        Self::DTYPE
    }
}

impl Scalar for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }

    #[inline]
    fn into_f32(self) -> f32 {
        self
    }
}

impl Scalar for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }

    #[inline]
    fn into_f32(self) -> f32 {
        self.to_f32()
    }
}

/// Returns true if any element is infinite or NaN.
#[must_use]
pub fn has_inf_or_nan<T: Scalar>(values: &[T]) -> bool {
    values.iter().any(|v| !v.is_finite())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::F16.size_of(), 2);
        assert_eq!(DType::F32.size_of(), 4);
    }

    #[test]
    fn test_scalar_dtype() {
        assert_eq!(f32::dtype(), DType::F32);
        assert_eq!(f16::dtype(), DType::F16);
        assert!(DType::F16.is_half());
    }

    #[test]
    fn test_half_round_trip_is_exact_for_representable_values() {
        for v in [0.0_f32, 1.0, -2.5, 0.125, 1024.0] {
            assert_eq!(<f16 as Scalar>::from_f32(v).into_f32(), v);
        }
    }

    #[test]
    fn test_half_overflows_to_inf() {
        let big = <f16 as Scalar>::from_f32(1.0e6);
        assert!(big.is_infinite());
        assert!(has_inf_or_nan(&[big]));
    }

    #[test]
    fn test_has_inf_or_nan() {
        assert!(!has_inf_or_nan(&[1.0_f32, 2.0]));
        assert!(has_inf_or_nan(&[1.0_f32, f32::NAN]));
        assert!(has_inf_or_nan(&[f32::NEG_INFINITY]));
    }
}
