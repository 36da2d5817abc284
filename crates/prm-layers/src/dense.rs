//! Dense (fully connected) layer implementation.
//!
//! This module provides the [`Dense`] layer, which performs a linear transformation
//! `y = xW + b` over the last axis of its input.

use rand::Rng;

use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::{check_last_dim, Layer};
use crate::tensor::Tensor;

/// A dense (fully connected) layer.
///
/// Performs the transformation `y = xW + b` where:
/// - `x` is the input tensor of shape `[..., in_features]`
/// - `W` is the weight matrix of shape `[in_features, out_features]`
/// - `b` is the bias vector of shape `[out_features]`
/// - `y` is the output tensor of shape `[..., out_features]`
///
/// Leading axes are flattened for the product and restored afterwards, so
/// the same layer applies position-wise to `[batch, seq_len, features]`.
#[derive(Debug, Clone)]
pub struct Dense {
    /// Weight matrix of shape [in_features, out_features]
    weights: Tensor,
    /// Bias vector of shape [out_features]
    bias: Tensor,
    /// Gradient of weights
    weights_grad: Option<Tensor>,
    /// Gradient of bias
    bias_grad: Option<Tensor>,
    /// Cached input for backward pass
    cached_input: Option<Tensor>,
    in_features: usize,
    out_features: usize,
    use_bias: bool,
}

impl Dense {
    /// Creates a dense layer with Glorot-uniform weights and a zero bias.
    ///
    /// # Arguments
    ///
    /// * `in_features` - Number of input features
    /// * `out_features` - Number of output features
    /// * `rng` - Source of randomness for the weights
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        Self::new_with_initializer(
            in_features,
            out_features,
            Initializer::GlorotUniform,
            true,
            rng,
        )
    }

    /// Creates a dense layer without bias.
    pub fn new_no_bias<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        Self::new_with_initializer(
            in_features,
            out_features,
            Initializer::GlorotUniform,
            false,
            rng,
        )
    }

    /// Creates a dense layer with a custom weight initializer.
    pub fn new_with_initializer<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        weight_init: Initializer,
        use_bias: bool,
        rng: &mut R,
    ) -> Self {
        Self {
            weights: weight_init.initialize(&[in_features, out_features], rng),
            bias: Tensor::zeros(&[out_features]),
            weights_grad: None,
            bias_grad: None,
            cached_input: None,
            in_features,
            out_features,
            use_bias,
        }
    }

    /// Creates a dense layer with custom weights and bias.
    ///
    /// # Errors
    ///
    /// Returns an error if the shapes are incompatible
    pub fn from_weights(weights: Tensor, bias: Tensor) -> Result<Self, LayerError> {
        if weights.ndim() != 2 {
            return Err(LayerError::ConfigError {
                message: format!("Weights must be 2D, got {}D", weights.ndim()),
            });
        }
        if bias.shape() != [weights.shape()[1]] {
            return Err(LayerError::ShapeMismatch {
                expected: vec![weights.shape()[1]],
                actual: bias.shape().to_vec(),
            });
        }

        let in_features = weights.shape()[0];
        let out_features = weights.shape()[1];
        Ok(Self {
            weights,
            bias,
            weights_grad: None,
            bias_grad: None,
            cached_input: None,
            in_features,
            out_features,
            use_bias: true,
        })
    }

    /// Returns the input feature dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Returns the output feature dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Returns a reference to the weights tensor.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Returns a reference to the bias tensor.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Returns the weight gradients if available.
    pub fn weights_grad(&self) -> Option<&Tensor> {
        self.weights_grad.as_ref()
    }

    /// Returns the bias gradients if available.
    pub fn bias_grad(&self) -> Option<&Tensor> {
        self.bias_grad.as_ref()
    }

    fn out_shape(&self, input: &Tensor) -> Vec<usize> {
        let mut shape = input.shape().to_vec();
        if let Some(last) = shape.last_mut() {
            *last = self.out_features;
        }
        shape
    }
}

impl Layer for Dense {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        check_last_dim(input, self.in_features)?;

        let input_2d = input.reshape(&[input.rows(), self.in_features]);
        let mut output = input_2d.matmul(&self.weights);
        if self.use_bias {
            output.add_assign(&self.bias);
        }
        Ok(output.into_reshape(&self.out_shape(input)))
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let output = self.forward(input)?;
        self.cached_input = Some(input.clone());
        Ok(output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;

        let expected = self.out_shape(input);
        if grad.shape() != expected.as_slice() {
            return Err(LayerError::ShapeMismatch {
                expected,
                actual: grad.shape().to_vec(),
            });
        }

        let rows = input.rows();
        let input_2d = input.reshape(&[rows, self.in_features]);
        let grad_2d = grad.reshape(&[rows, self.out_features]);

        // dL/dW = x^T @ dL/dy
        self.weights_grad = Some(input_2d.transpose().matmul(&grad_2d));
        if self.use_bias {
            self.bias_grad = Some(grad_2d.sum_rows());
        }

        // dL/dx = dL/dy @ W^T
        let input_grad = grad_2d.matmul(&self.weights.transpose());
        Ok(input_grad.into_reshape(input.shape()))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        if self.use_bias {
            vec![&self.weights, &self.bias]
        } else {
            vec![&self.weights]
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        if self.use_bias {
            vec![&mut self.weights, &mut self.bias]
        } else {
            vec![&mut self.weights]
        }
    }

    fn gradients(&self) -> Vec<Option<&Tensor>> {
        if self.use_bias {
            vec![self.weights_grad.as_ref(), self.bias_grad.as_ref()]
        } else {
            vec![self.weights_grad.as_ref()]
        }
    }

    fn parameter_names(&self) -> Vec<String> {
        if self.use_bias {
            vec!["weights".to_string(), "bias".to_string()]
        } else {
            vec!["weights".to_string()]
        }
    }

    fn name(&self) -> &str {
        "Dense"
    }
}
