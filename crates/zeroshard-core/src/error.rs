//! Error Types - zeroshard Core Error Handling
//!
//! Errors raised by the storage, dtype and tensor layers. Higher layers wrap
//! these in their own error enums.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use thiserror::Error;

use crate::device::Device;
use crate::dtype::DType;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Shape mismatch between tensors.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// Data type mismatch between payloads.
    #[error("DType mismatch: expected {expected}, got {actual}")]
    DTypeMismatch {
        /// The expected data type.
        expected: DType,
        /// The actual data type.
        actual: DType,
    },

    /// Device mismatch between payloads.
    #[error("Device mismatch: expected {expected}, got {actual}")]
    DeviceMismatch {
        /// The expected device.
        expected: Device,
        /// The actual device.
        actual: Device,
    },

    /// Index out of bounds.
    #[error("Index out of bounds: index {index} for dimension of size {size}")]
    IndexOutOfBounds {
        /// The invalid index.
        index: usize,
        /// The size of the dimension.
        size: usize,
    },

    /// Memory budget exceeded.
    #[error("Memory allocation failed: requested {size} bytes on {device}")]
    AllocationFailed {
        /// The requested size in bytes.
        size: usize,
        /// The device on which allocation failed.
        device: Device,
    },

    /// Invalid operation for the given tensor.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Empty tensor error.
    #[error("Operation not supported on empty tensor")]
    EmptyTensor,

    /// The payload was freed and has not been restored.
    #[error("Payload has been released")]
    PayloadReleased,
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for core operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Helper Functions
// =============================================================================

impl Error {
    /// Creates a new shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Creates a new invalid operation error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::shape_mismatch(&[2, 3], &[2, 4]);
        assert!(err.to_string().contains("Shape mismatch"));

        let err = Error::DeviceMismatch {
            expected: Device::Cpu,
            actual: Device::Cuda(0),
        };
        assert_eq!(
            err.to_string(),
            "Device mismatch: expected cpu, got cuda:0"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::PayloadReleased, Error::PayloadReleased);
    }
}
