//! Layer trait definition.
//!
//! Every layer keeps the activations it needs for its backward pass when it
//! is run through [`Layer::forward_train`]; [`Layer::forward`] is the
//! side-effect-free inference path. Gradients computed by
//! [`Layer::backward`] stay on the layer until the next backward call and
//! are exposed through [`Layer::gradients`], aligned index-for-index with
//! [`Layer::parameters`].

use crate::error::LayerError;
use crate::tensor::Tensor;

/// A neural network layer that supports forward and backward propagation.
///
/// # Example
///
/// ```
/// use prm_layers::dense::Dense;
/// use prm_layers::layer::Layer;
/// use prm_layers::tensor::Tensor;
/// use rand::SeedableRng;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(0);
/// let layer = Dense::new(128, 64, &mut rng);
/// let output = layer.forward(&Tensor::zeros(&[32, 128])).unwrap();
/// assert_eq!(output.shape(), &[32, 64]);
/// ```
pub trait Layer: Send + Sync {
    /// Computes the layer output without recording anything for backward.
    ///
    /// # Errors
    ///
    /// Returns a [`LayerError`] if the input shape is incompatible with the layer
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError>;

    /// Computes the layer output and caches what [`Layer::backward`] needs.
    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError>;

    /// Takes the gradient of the loss with respect to the layer's output and
    /// returns the gradient with respect to its input, storing parameter
    /// gradients on the layer.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotInitialized`] if no training forward pass ran.
    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError>;

    /// Returns references to the layer's learnable parameters.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Returns mutable references to the layer's learnable parameters.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Returns the most recent gradient of each parameter, if any.
    fn gradients(&self) -> Vec<Option<&Tensor>>;

    /// Returns a stable name for each parameter.
    fn parameter_names(&self) -> Vec<String>;

    /// Returns the name of the layer for debugging and logging purposes.
    fn name(&self) -> &str {
        "Layer"
    }

    /// Sets the layer's training mode.
    ///
    /// Only layers whose training and inference behavior differ (dropout)
    /// need to override this.
    fn set_training(&mut self, _training: bool) {}
}

/// Prefixes each name with `prefix.`.
pub fn scoped(prefix: &str, names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|name| format!("{}.{}", prefix, name))
        .collect()
}

pub(crate) fn check_last_dim(input: &Tensor, expected: usize) -> Result<(), LayerError> {
    if input.ndim() == 0 {
        return Err(LayerError::ForwardError {
            message: "expected at least 1D input, got a scalar".to_string(),
        });
    }
    if input.last_dim() != expected {
        return Err(LayerError::InvalidInputDimension {
            expected,
            actual: input.last_dim(),
        });
    }
    Ok(())
}
