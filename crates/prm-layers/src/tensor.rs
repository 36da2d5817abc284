#![allow(clippy::needless_range_loop)]
//! Dense row-major tensor used by every layer in this crate.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A multi-dimensional array of `f32` in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// The shape of the tensor (dimensions)
    shape: Vec<usize>,
    /// The underlying data in row-major order
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a new tensor with the given shape, filled with zeros.
    ///
    /// # Example
    ///
    /// ```
    /// use prm_layers::tensor::Tensor;
    ///
    /// let t = Tensor::zeros(&[2, 3]);
    /// assert_eq!(t.shape(), &[2, 3]);
    /// assert_eq!(t.numel(), 6);
    /// ```
    pub fn zeros(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; numel],
        }
    }

    /// Creates a new tensor with the given shape, filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![1.0; numel],
        }
    }

    /// Creates a new tensor with the given shape and data.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the shape
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            numel
        );
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns the size of the last dimension, or 1 for a scalar.
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Returns the number of rows when viewed as `[numel / last_dim, last_dim]`.
    pub fn rows(&self) -> usize {
        match self.last_dim() {
            0 => 0,
            d => self.numel() / d,
        }
    }

    /// Returns the underlying data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the underlying data mutably.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Matrix multiplication of two 2D tensors, parallel over output rows.
    ///
    /// # Panics
    ///
    /// Panics if either tensor is not 2D or the inner dimensions don't match
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(
            self.shape[1], other.shape[0],
            "Inner dimensions must match for matmul"
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[1];

        let mut result = vec![0.0; m * n];
        if n > 0 {
            result.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
                let lhs = &self.data[i * k..(i + 1) * k];
                for (l, &a) in lhs.iter().enumerate() {
                    if a == 0.0 {
                        continue;
                    }
                    let rhs = &other.data[l * n..(l + 1) * n];
                    for (out, &b) in row.iter_mut().zip(rhs) {
                        *out += a * b;
                    }
                }
            });
        }

        Tensor::from_data(&[m, n], result)
    }

    /// Transposes a 2D tensor.
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires 2D tensor");
        let m = self.shape[0];
        let n = self.shape[1];

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                result[j * m + i] = self.data[i * n + j];
            }
        }

        Tensor::from_data(&[n, m], result)
    }

    /// Element-wise addition.
    ///
    /// `other` may have the same shape, or be 1D with the length of the last
    /// dimension, in which case it is added to every row.
    pub fn add(&self, other: &Tensor) -> Tensor {
        let mut out = self.clone();
        out.add_assign(other);
        out
    }

    /// In-place version of [`Tensor::add`].
    pub fn add_assign(&mut self, other: &Tensor) {
        if self.shape == other.shape {
            for (a, b) in self.data.iter_mut().zip(&other.data) {
                *a += b;
            }
        } else if other.ndim() == 1 && other.shape[0] == self.last_dim() {
            let n = other.shape[0];
            if n == 0 {
                return;
            }
            for row in self.data.chunks_mut(n) {
                for (a, b) in row.iter_mut().zip(&other.data) {
                    *a += b;
                }
            }
        } else {
            panic!(
                "Cannot broadcast shapes {:?} and {:?}",
                self.shape, other.shape
            );
        }
    }

    /// Element-wise multiplication of two tensors with the same shape.
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "Cannot multiply shapes {:?} and {:?}",
            self.shape, other.shape
        );
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Scalar multiplication.
    pub fn scale(&self, scalar: f32) -> Tensor {
        self.map(|a| a * scalar)
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Sums over every leading dimension, returning a `[last_dim]` tensor.
    pub fn sum_rows(&self) -> Tensor {
        let n = self.last_dim();
        let mut out = vec![0.0; n];
        if n > 0 {
            for row in self.data.chunks(n) {
                for (acc, v) in out.iter_mut().zip(row) {
                    *acc += v;
                }
            }
        }
        Tensor::from_data(&[n], out)
    }

    /// Applies a function element-wise.
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        let data = self.data.iter().map(|&x| f(x)).collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Returns a copy with a new shape.
    ///
    /// # Panics
    ///
    /// Panics if the element count changes
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        Tensor::from_data(new_shape, self.data.clone())
    }

    /// Changes the shape without copying.
    ///
    /// # Panics
    ///
    /// Panics if the element count changes
    pub fn into_reshape(self, new_shape: &[usize]) -> Tensor {
        Tensor::from_data(new_shape, self.data)
    }
}
