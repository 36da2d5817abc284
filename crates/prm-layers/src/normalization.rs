//! Layer normalization over the last axis.

use crate::error::LayerError;
use crate::layer::{check_last_dim, Layer};
use crate::tensor::Tensor;

/// Layer Normalization.
///
/// Normalizes each row (all elements sharing the leading indices) to zero
/// mean and unit variance, then applies a learned scale `gamma` and shift
/// `beta`:
///
/// ```text
/// y = gamma * (x - mean) / sqrt(var + eps) + beta
/// ```
#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Learnable scale parameter (gamma)
    gamma: Tensor,
    /// Learnable shift parameter (beta)
    beta: Tensor,
    /// Small constant for numerical stability
    eps: f32,
    /// Normalized dimension
    normalized_shape: usize,
    cached_input: Option<Tensor>,
    cached_mean: Option<Vec<f32>>,
    cached_var: Option<Vec<f32>>,
    gamma_grad: Option<Tensor>,
    beta_grad: Option<Tensor>,
}

impl LayerNorm {
    /// Creates a new Layer Normalization layer.
    ///
    /// # Arguments
    ///
    /// * `normalized_shape` - The size of the dimension to normalize
    pub fn new(normalized_shape: usize) -> Self {
        Self {
            gamma: Tensor::ones(&[normalized_shape]),
            beta: Tensor::zeros(&[normalized_shape]),
            eps: 1e-5,
            normalized_shape,
            cached_input: None,
            cached_mean: None,
            cached_var: None,
            gamma_grad: None,
            beta_grad: None,
        }
    }

    /// Sets epsilon.
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Returns the gamma gradient if available.
    pub fn gamma_grad(&self) -> Option<&Tensor> {
        self.gamma_grad.as_ref()
    }

    fn statistics(&self, input: &Tensor) -> (Vec<f32>, Vec<f32>) {
        let dim = self.normalized_shape;
        let n = dim as f32;
        input
            .data()
            .chunks(dim)
            .map(|row| {
                let mean = row.iter().sum::<f32>() / n;
                let var = row.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
                (mean, var)
            })
            .unzip()
    }

    fn normalize(&self, input: &Tensor, mean: &[f32], var: &[f32]) -> Tensor {
        let dim = self.normalized_shape;
        let gamma = self.gamma.data();
        let beta = self.beta.data();
        let mut out = Vec::with_capacity(input.numel());
        for (i, row) in input.data().chunks(dim).enumerate() {
            let std_inv = 1.0 / (var[i] + self.eps).sqrt();
            for j in 0..dim {
                out.push(gamma[j] * (row[j] - mean[i]) * std_inv + beta[j]);
            }
        }
        Tensor::from_data(input.shape(), out)
    }
}

impl Layer for LayerNorm {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        check_last_dim(input, self.normalized_shape)?;
        let (mean, var) = self.statistics(input);
        Ok(self.normalize(input, &mean, &var))
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        check_last_dim(input, self.normalized_shape)?;
        let (mean, var) = self.statistics(input);
        let output = self.normalize(input, &mean, &var);
        self.cached_input = Some(input.clone());
        self.cached_mean = Some(mean);
        self.cached_var = Some(var);
        Ok(output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        let mean = self
            .cached_mean
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        let var = self.cached_var.as_ref().ok_or(LayerError::NotInitialized)?;

        if grad.shape() != input.shape() {
            return Err(LayerError::ShapeMismatch {
                expected: input.shape().to_vec(),
                actual: grad.shape().to_vec(),
            });
        }

        let dim = self.normalized_shape;
        let n = dim as f32;
        let gamma = self.gamma.data();
        let mut gamma_grad = vec![0.0; dim];
        let mut input_grad = vec![0.0; input.numel()];

        for (i, (row, grad_row)) in input
            .data()
            .chunks(dim)
            .zip(grad.data().chunks(dim))
            .enumerate()
        {
            let std_inv = 1.0 / (var[i] + self.eps).sqrt();
            let x_norm: Vec<f32> = row.iter().map(|x| (x - mean[i]) * std_inv).collect();

            let mut dx_norm_sum = 0.0;
            let mut dx_norm_x_norm_sum = 0.0;
            for j in 0..dim {
                gamma_grad[j] += grad_row[j] * x_norm[j];
                let dx_norm = grad_row[j] * gamma[j];
                dx_norm_sum += dx_norm;
                dx_norm_x_norm_sum += dx_norm * x_norm[j];
            }

            for j in 0..dim {
                let dx_norm = grad_row[j] * gamma[j];
                input_grad[i * dim + j] =
                    std_inv / n * (n * dx_norm - dx_norm_sum - x_norm[j] * dx_norm_x_norm_sum);
            }
        }

        self.gamma_grad = Some(Tensor::from_data(&[dim], gamma_grad));
        self.beta_grad = Some(grad.sum_rows());
        Ok(Tensor::from_data(input.shape(), input_grad))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.gamma, &self.beta]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.gamma, &mut self.beta]
    }

    fn gradients(&self) -> Vec<Option<&Tensor>> {
        vec![self.gamma_grad.as_ref(), self.beta_grad.as_ref()]
    }

    fn parameter_names(&self) -> Vec<String> {
        vec!["gamma".to_string(), "beta".to_string()]
    }

    fn name(&self) -> &str {
        "LayerNorm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_close, numeric_input_grad, random_tensor, weighted_sum_grad};

    #[test]
    fn test_layer_norm_forward() {
        let ln = LayerNorm::new(4);
        let input = Tensor::from_data(&[2, 4], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let output = ln.forward(&input).unwrap();

        for row in output.data().chunks(4) {
            let mean: f32 = row.iter().sum::<f32>() / 4.0;
            let var: f32 = row.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_layer_norm_3d() {
        let ln = LayerNorm::new(3);
        let output = ln.forward(&random_tensor(&[2, 5, 3], 1)).unwrap();
        assert_eq!(output.shape(), &[2, 5, 3]);
    }

    #[test]
    fn test_layer_norm_gradients() {
        let mut ln = LayerNorm::new(4);
        let input = random_tensor(&[2, 3, 4], 9);

        let out = ln.forward_train(&input).unwrap();
        let grad_in = ln.backward(&weighted_sum_grad(out.shape())).unwrap();
        let numeric = numeric_input_grad(&input, |x| ln.forward(x).unwrap());
        assert_close(grad_in.data(), numeric.data(), 2e-2);

        assert_eq!(ln.gamma_grad().unwrap().shape(), &[4]);
        assert_eq!(ln.gradients().len(), 2);
    }
}
