//! Tensor - Full-Precision Compute Array
//!
//! The `Tensor` struct is what the compute layer sees. Its storage is shared
//! on clone, so a parameter's gathered view and the module holding the
//! parameter observe the same buffer.
//!
//! # Key Features
//! - Row-major contiguous layout
//! - Shared storage on clone, deep copy on request
//! - 2-D linear algebra and row-wise activations used by the layers
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use core::fmt;

use zeroshard_core::error::{Error, Result};
use zeroshard_core::storage::Storage;
use zeroshard_core::Device;

use crate::ops;
use crate::shape::{matrix_dims, numel, reshape, Shape};

// =============================================================================
// Tensor Struct
// =============================================================================

/// A row-major array of `f32` values.
#[derive(Clone)]
pub struct Tensor {
    /// Underlying data storage (reference-counted).
    pub(crate) storage: Storage<f32>,
    /// Shape of the tensor (dimensions).
    pub(crate) shape: Shape,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a new tensor from storage with the given shape.
    pub fn from_storage(storage: Storage<f32>, shape: &[usize]) -> Result<Self> {
        let total = numel(shape);
        if total != storage.len() {
            return Err(Error::shape_mismatch(&[storage.len()], shape));
        }
        Ok(Self {
            storage,
            shape: Shape::from_slice(shape),
        })
    }

    /// Creates a new tensor from a vector with the given shape.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        Self::from_storage(Storage::from_vec(data, Device::Cpu), shape)
    }

    /// Creates a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Creates a tensor filled with a constant value.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        Self {
            storage: Storage::from_vec(vec![value; numel(shape)], Device::Cpu),
            shape: Shape::from_slice(shape),
        }
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns the shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    /// Returns true if the tensor has zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// Returns the device the storage resides on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.storage.device()
    }

    /// Returns the underlying storage.
    #[must_use]
    pub fn storage(&self) -> &Storage<f32> {
        &self.storage
    }

    /// Returns the data as a vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.storage.to_vec()
    }

    // =========================================================================
    // Shape Operations
    // =========================================================================

    /// Returns a tensor sharing this storage with a new shape.
    pub fn reshape(&self, new_shape: &[isize]) -> Result<Self> {
        let shape = reshape(&self.shape, new_shape)?;
        Ok(Self {
            storage: self.storage.clone(),
            shape,
        })
    }

    /// Returns the transpose of a 2-D tensor.
    pub fn t(&self) -> Result<Self> {
        let (rows, cols) = matrix_dims(&self.shape)?;
        let src = self.storage.as_slice();
        let mut dst = vec![0.0; rows * cols];
        ops::transpose(&mut dst, &src, rows, cols);
        Self::from_vec(dst, &[cols, rows])
    }

    /// Makes a deep copy of this tensor.
    #[must_use]
    pub fn clone_deep(&self) -> Self {
        Self {
            storage: self.storage.deep_copy(),
            shape: self.shape.clone(),
        }
    }

    /// Fills the tensor in place.
    pub fn fill_(&self, value: f32) {
        self.storage.as_slice_mut().fill(value);
    }

    // =========================================================================
    // Reductions
    // =========================================================================

    /// Returns the sum of all elements.
    #[must_use]
    pub fn sum(&self) -> f32 {
        ops::sum(&self.storage.as_slice())
    }

    /// Returns the mean of all elements.
    pub fn mean(&self) -> Result<f32> {
        if self.is_empty() {
            return Err(Error::EmptyTensor);
        }
        Ok(self.sum() / self.numel() as f32)
    }

    /// Sums a `[rows, cols]` tensor over its rows, giving `[cols]`.
    pub fn sum_rows(&self) -> Result<Self> {
        let (_, cols) = matrix_dims(&self.shape)?;
        let src = self.storage.as_slice();
        let mut out = vec![0.0; cols];
        for row in src.chunks(cols) {
            ops::axpy(&mut out, 1.0, row);
        }
        Self::from_vec(out, &[cols])
    }

    /// Returns true if any element is infinite or NaN.
    #[must_use]
    pub fn has_inf_or_nan(&self) -> bool {
        ops::count_non_finite(&self.storage.as_slice()) > 0
    }

    /// Elementwise closeness: `|a - b| <= atol + rtol * |b|`.
    #[must_use]
    pub fn allclose(&self, other: &Self, rtol: f32, atol: f32) -> bool {
        if self.shape != other.shape {
            return false;
        }
        let a = self.storage.as_slice();
        let b = other.storage.as_slice();
        a.iter()
            .zip(b.iter())
            .all(|(&x, &y)| (x - y).abs() <= atol + rtol * y.abs())
    }

    // =========================================================================
    // Activation Functions
    // =========================================================================

    /// Applies `ReLU` activation: max(0, x).
    #[must_use]
    pub fn relu(&self) -> Self {
        let src = self.storage.as_slice();
        let mut dst = vec![0.0; src.len()];
        ops::relu(&mut dst, &src);
        Self {
            storage: Storage::from_vec(dst, Device::Cpu),
            shape: self.shape.clone(),
        }
    }

    /// Gradient of `ReLU` evaluated at `self`, applied to `grad`.
    pub fn relu_backward(&self, grad: &Self) -> Result<Self> {
        self.check_same_shape(grad)?;
        let input = self.storage.as_slice();
        let g = grad.storage.as_slice();
        let mut dst = vec![0.0; input.len()];
        ops::relu_backward(&mut dst, &g, &input);
        Self::from_vec(dst, &self.shape)
    }

    /// Row-wise softmax of a 2-D tensor.
    pub fn softmax_rows(&self) -> Result<Self> {
        let (_, cols) = matrix_dims(&self.shape)?;
        let src = self.storage.as_slice();
        let mut dst = vec![0.0; src.len()];
        ops::softmax_rows(&mut dst, &src, cols);
        Self::from_vec(dst, &self.shape)
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    fn check_same_shape(&self, other: &Self) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::shape_mismatch(&self.shape, &other.shape));
        }
        Ok(())
    }

    fn zip_with(&self, other: &Self, f: impl Fn(f32, f32) -> f32) -> Result<Self> {
        self.check_same_shape(other)?;
        let a = self.storage.as_slice();
        let b = other.storage.as_slice();
        let data = a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect();
        Self::from_vec(data, &self.shape)
    }

    /// Element-wise addition.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |x, y| x + y)
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |x, y| x - y)
    }

    /// Element-wise multiplication.
    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |x, y| x * y)
    }

    /// Adds a `[cols]` row vector to every row of a `[rows, cols]` tensor.
    pub fn add_row(&self, row: &Self) -> Result<Self> {
        let (_, cols) = matrix_dims(&self.shape)?;
        if row.shape.as_slice() != [cols] {
            return Err(Error::shape_mismatch(&[cols], &row.shape));
        }
        let mut data = self.to_vec();
        let r = row.storage.as_slice();
        for chunk in data.chunks_mut(cols) {
            ops::axpy(chunk, 1.0, &r);
        }
        Self::from_vec(data, &self.shape)
    }

    /// Scalar multiplication.
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Self {
        let mut data = self.to_vec();
        ops::scale(&mut data, scalar);
        Self {
            storage: Storage::from_vec(data, Device::Cpu),
            shape: self.shape.clone(),
        }
    }

    /// 2-D matrix multiplication: `[m, k] @ [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Self) -> Result<Self> {
        let (m, k1) = matrix_dims(&self.shape)?;
        let (k2, n) = matrix_dims(&other.shape)?;
        if k1 != k2 {
            return Err(Error::invalid_operation(format!(
                "matmul inner dimensions must match: {k1} vs {k2}"
            )));
        }
        let a = self.storage.as_slice();
        let b = other.storage.as_slice();
        let mut c = vec![0.0; m * n];
        ops::matmul(&mut c, &a, &b, m, n, k1);
        Self::from_vec(c, &[m, n])
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape.as_slice())
            .field("device", &self.device())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
