//! Batch tensor assembly

use ndarray::{Array4, ArrayView3, Axis};

use crate::{InferenceError, INPUT_SHAPE};

/// Stacked model input, shape [K, 1, 28, 28] with K >= 1
#[derive(Debug, Clone, PartialEq)]
pub struct BatchTensor {
    data: Array4<f32>,
}

impl BatchTensor {
    /// Concatenate single-item tensors along a new leading axis, preserving order
    pub fn stack(rows: &[ArrayView3<'_, f32>]) -> Result<Self, InferenceError> {
        if rows.is_empty() {
            return Err(InferenceError::EmptyBatch);
        }

        if let Some(bad) = rows.iter().find(|row| row.shape() != INPUT_SHAPE) {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{:?}", INPUT_SHAPE),
                actual: format!("{:?}", bad.shape()),
            });
        }

        let data = ndarray::stack(Axis(0), rows).map_err(|e| InferenceError::InvalidInputShape {
            expected: format!("{:?}", INPUT_SHAPE),
            actual: e.to_string(),
        })?;

        Ok(Self { data })
    }

    /// All-zero batch of `rows` items (warm-up input)
    pub fn zeros(rows: usize) -> Result<Self, InferenceError> {
        if rows == 0 {
            return Err(InferenceError::EmptyBatch);
        }
        let [c, h, w] = INPUT_SHAPE;
        Ok(Self {
            data: Array4::zeros((rows, c, h, w)),
        })
    }

    /// Number of rows (K)
    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// One row as a [1, 28, 28] view
    pub fn row(&self, index: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    /// Contiguous row-major data
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}
