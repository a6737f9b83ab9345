//! Shape - Tensor Dimension Management
//!
//! Shapes are small vectors of dimensions. The engine only ever needs the
//! element count, reshape with a single inferred dimension, and the row/column
//! split of a matrix.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use smallvec::SmallVec;

use zeroshard_core::error::{Error, Result};

// =============================================================================
// Type Aliases
// =============================================================================

/// Shape type - dimensions of a tensor.
/// Uses `SmallVec` for stack allocation of small shapes (up to 4 dimensions).
pub type Shape = SmallVec<[usize; 4]>;

// =============================================================================
// Shape Utilities
// =============================================================================

/// Computes the total number of elements from a shape.
#[must_use]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Resolves a reshape target, inferring at most one `-1` dimension.
pub fn reshape(old_shape: &[usize], new_shape: &[isize]) -> Result<Shape> {
    let old_numel = numel(old_shape);
    let mut result = Shape::with_capacity(new_shape.len());
    let mut infer_idx = None;
    let mut known_numel = 1usize;

    for (i, &dim) in new_shape.iter().enumerate() {
        if dim == -1 {
            if infer_idx.is_some() {
                return Err(Error::invalid_operation("Can only have one -1 in reshape"));
            }
            infer_idx = Some(i);
            result.push(0);
        } else if dim < 0 {
            return Err(Error::invalid_operation("Invalid dimension in reshape"));
        } else {
            let d = dim as usize;
            known_numel *= d;
            result.push(d);
        }
    }

    if let Some(idx) = infer_idx {
        if known_numel == 0 || old_numel % known_numel != 0 {
            return Err(Error::invalid_operation(
                "Cannot infer dimension: not evenly divisible",
            ));
        }
        result[idx] = old_numel / known_numel;
    } else if known_numel != old_numel {
        return Err(Error::shape_mismatch(old_shape, &result));
    }

    Ok(result)
}

/// Returns `(rows, cols)` of a 2-D shape.
pub fn matrix_dims(shape: &[usize]) -> Result<(usize, usize)> {
    match *shape {
        [rows, cols] => Ok((rows, cols)),
        _ => Err(Error::invalid_operation(format!(
            "expected a 2-D tensor, got shape {shape:?}"
        ))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numel() {
        assert_eq!(numel(&[2, 3, 4]), 24);
        assert_eq!(numel(&[]), 1);
        assert_eq!(numel(&[5]), 5);
    }

    #[test]
    fn test_reshape() {
        let old_shape = [2, 3, 4];

        let new = reshape(&old_shape, &[6, 4]).unwrap();
        assert_eq!(new.as_slice(), &[6, 4]);

        let new = reshape(&old_shape, &[-1, 4]).unwrap();
        assert_eq!(new.as_slice(), &[6, 4]);

        assert!(reshape(&old_shape, &[5, 5]).is_err());
        assert!(reshape(&old_shape, &[-1, -1]).is_err());
    }

    #[test]
    fn test_matrix_dims() {
        assert_eq!(matrix_dims(&[3, 5]).unwrap(), (3, 5));
        assert!(matrix_dims(&[3]).is_err());
    }
}
