use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shape and indexing failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// The blob length does not match the product of the shape.
    #[error("shape {shape:?} needs {expected} elements, got {got}")]
    ShapeMismatch {
        /// Requested shape.
        shape: Vec<usize>,
        /// Number of elements the shape implies.
        expected: usize,
        /// Number of elements supplied.
        got: usize,
    },
    /// The tensor has the wrong number of dimensions.
    #[error("expected a rank-{expected} tensor, got shape {shape:?}")]
    RankMismatch {
        /// Required number of dimensions.
        expected: usize,
        /// Actual shape.
        shape: Vec<usize>,
    },
    /// An index is out of range for the tensor's shape.
    #[error("index {index:?} out of bounds for shape {shape:?}")]
    OutOfBounds {
        /// Offending index.
        index: Vec<usize>,
        /// Tensor shape.
        shape: Vec<usize>,
    },
}

/// Owned, row-major, n-dimensional array.
///
/// Only what the pipeline needs: construction with shape checks,
/// element access and row views. No arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<T> {
    shape: Vec<usize>,
    blob: Vec<T>,
}

impl<T> Tensor<T> {
    /// Wraps `blob` with `shape`, failing if the element count differs.
    pub fn raw(shape: &[usize], blob: Vec<T>) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if expected != blob.len() {
            return Err(TensorError::ShapeMismatch {
                shape: shape.to_vec(),
                expected,
                got: blob.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            blob,
        })
    }

    /// The tensor's dimensions.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major storage.
    pub fn blob(&self) -> &[T] {
        &self.blob
    }

    /// Mutable flat storage. The shape is fixed.
    pub fn blob_mut(&mut self) -> &mut [T] {
        &mut self.blob
    }

    /// Consumes the tensor, returning its storage.
    pub fn into_blob(self) -> Vec<T> {
        self.blob
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.blob.len()
    }

    fn offset(&self, index: &[usize]) -> Result<usize, TensorError> {
        let out_of_bounds = || TensorError::OutOfBounds {
            index: index.to_vec(),
            shape: self.shape.clone(),
        };
        if index.len() != self.shape.len() {
            return Err(out_of_bounds());
        }
        let mut offset = 0;
        for (&i, &dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return Err(out_of_bounds());
            }
            offset = offset * dim + i;
        }
        Ok(offset)
    }

    /// Element at a full index.
    pub fn at(&self, index: &[usize]) -> Result<&T, TensorError> {
        let offset = self.offset(index)?;
        Ok(&self.blob[offset])
    }

    /// Contiguous run of the innermost dimension at `outer` (all but the last index).
    pub fn row(&self, outer: &[usize]) -> Result<&[T], TensorError> {
        let width = self.shape.last().copied().unwrap_or(1);
        let mut full = outer.to_vec();
        full.push(0);
        let start = self.offset(&full)?;
        Ok(&self.blob[start..start + width])
    }
}

impl<T: Clone + Default> Tensor<T> {
    /// Tensor of default values (zeros for numbers).
    pub fn zeros(shape: &[usize]) -> Self {
        let size = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            blob: vec![T::default(); size],
        }
    }
}
