//! Dense row-major tensors and boolean row masks.
//!
//! The harness only needs a narrow view of model inputs and outputs: the first
//! dimension is always the sample count, and classification policies read a
//! row-wise argmax. Everything else is the model's business.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};

/// A dense `f32` tensor stored in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Build a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, HarnessError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(HarnessError::shape(
                format!("{expected} elements for shape {shape:?}"),
                format!("{} elements", data.len()),
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// A 1-D tensor, typically a vector of class labels.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of samples (size of the first dimension).
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of elements per sample.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn row(&self, index: usize) -> &[f32] {
        let width = self.row_len();
        &self.data[index * width..(index + 1) * width]
    }

    /// Index of the largest element in every row. Ties resolve to the lowest index.
    pub fn argmax_rows(&self) -> Vec<usize> {
        (0..self.rows())
            .map(|r| {
                let row = self.row(r);
                let mut best = 0;
                for (i, v) in row.iter().enumerate() {
                    if *v > row[best] {
                        best = i;
                    }
                }
                best
            })
            .collect()
    }

    /// Interpret every element as a class index.
    pub fn class_labels(&self) -> Result<Vec<usize>, HarnessError> {
        self.data
            .iter()
            .enumerate()
            .map(|(row, &v)| {
                if !v.is_finite() || v < 0.0 || v.fract() != 0.0 {
                    Err(HarnessError::InvalidLabel {
                        row,
                        label: v,
                        reason: "class labels must be non-negative integers",
                    })
                } else {
                    Ok(v as usize)
                }
            })
            .collect()
    }

    /// Gather the given rows into a new tensor, preserving the trailing dimensions.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self, HarnessError> {
        let rows = self.rows();
        let width = self.row_len();
        let mut data = Vec::with_capacity(indices.len() * width);
        for &i in indices {
            if i >= rows {
                return Err(HarnessError::shape(
                    format!("row index < {rows}"),
                    format!("row index {i}"),
                ));
            }
            data.extend_from_slice(self.row(i));
        }
        let mut shape = self.shape.clone();
        if shape.is_empty() {
            shape.push(indices.len());
        } else {
            shape[0] = indices.len();
        }
        Ok(Self { shape, data })
    }

    /// Inverse of [`Tensor::select_rows`]: place `rows` back at `indices` inside a
    /// zero tensor with `total_rows` rows.
    pub fn scatter_rows(
        rows: &Tensor,
        indices: &[usize],
        total_rows: usize,
    ) -> Result<Self, HarnessError> {
        if rows.rows() != indices.len() {
            return Err(HarnessError::shape(
                format!("{} rows", indices.len()),
                format!("{} rows", rows.rows()),
            ));
        }
        let width = rows.row_len();
        let mut shape = rows.shape.clone();
        if shape.is_empty() {
            shape.push(total_rows);
        } else {
            shape[0] = total_rows;
        }
        let mut out = Self::zeros(shape);
        for (src, &dst) in indices.iter().enumerate() {
            if dst >= total_rows {
                return Err(HarnessError::shape(
                    format!("row index < {total_rows}"),
                    format!("row index {dst}"),
                ));
            }
            out.data[dst * width..(dst + 1) * width].copy_from_slice(rows.row(src));
        }
        Ok(out)
    }

    pub fn ensure_same_shape(&self, other: &Tensor) -> Result<(), HarnessError> {
        if self.shape != other.shape {
            return Err(HarnessError::shape(
                format!("{:?}", self.shape),
                format!("{:?}", other.shape),
            ));
        }
        Ok(())
    }
}

/// Boolean row selector over a single-graph dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask(Vec<bool>);

impl Mask {
    pub fn new(flags: Vec<bool>) -> Self {
        Self(flags)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of selected rows.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|f| **f).count()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.then_some(i))
            .collect()
    }

    pub fn flags(&self) -> &[bool] {
        &self.0
    }
}

impl From<Vec<bool>> for Mask {
    fn from(flags: Vec<bool>) -> Self {
        Self::new(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_length() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_argmax_rows() {
        let t = Tensor::new(vec![3, 2], vec![0.9, 0.1, 0.2, 0.8, 0.5, 0.5]).unwrap();
        assert_eq!(t.argmax_rows(), vec![0, 1, 0]);
    }

    #[test]
    fn test_class_labels_rejects_fractional() {
        let t = Tensor::from_vec(vec![0.0, 1.0, 0.5]);
        match t.class_labels() {
            Err(HarnessError::InvalidLabel { row, .. }) => assert_eq!(row, 2),
            other => panic!("expected InvalidLabel, got {other:?}"),
        }
    }

    #[test]
    fn test_select_and_scatter_rows() {
        let t = Tensor::new(vec![4, 2], vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0]).unwrap();
        let picked = t.select_rows(&[1, 3]).unwrap();
        assert_eq!(picked.shape(), &[2, 2]);
        assert_eq!(picked.data(), &[2.0, 2.0, 4.0, 4.0]);

        let back = Tensor::scatter_rows(&picked, &[1, 3], 4).unwrap();
        assert_eq!(back.data(), &[0.0, 0.0, 2.0, 2.0, 0.0, 0.0, 4.0, 4.0]);
    }

    #[test]
    fn test_select_rows_out_of_range() {
        let t = Tensor::from_vec(vec![1.0, 2.0]);
        assert!(t.select_rows(&[2]).is_err());
    }

    #[test]
    fn test_mask_indices() {
        let mask = Mask::new(vec![true, false, true, false]);
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.indices(), vec![0, 2]);
    }
}
