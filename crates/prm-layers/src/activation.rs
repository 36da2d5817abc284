//! ReLU activation layer.

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// Rectified linear unit, `max(0, x)`.
#[derive(Debug, Clone, Default)]
pub struct Relu {
    cached_mask: Option<Vec<bool>>,
}

impl Relu {
    /// Creates a ReLU layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Relu {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.map(|x| x.max(0.0)))
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.cached_mask = Some(input.data().iter().map(|&x| x > 0.0).collect());
        self.forward(input)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let mask = self
            .cached_mask
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        if mask.len() != grad.numel() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![mask.len()],
                actual: grad.shape().to_vec(),
            });
        }
        let data = grad
            .data()
            .iter()
            .zip(mask)
            .map(|(&g, &active)| if active { g } else { 0.0 })
            .collect();
        Ok(Tensor::from_data(grad.shape(), data))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }

    fn gradients(&self) -> Vec<Option<&Tensor>> {
        Vec::new()
    }

    fn parameter_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "Relu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu() {
        let mut relu = Relu::new();
        let input = Tensor::from_data(&[4], vec![-1.0, 0.0, 0.5, 2.0]);
        assert_eq!(relu.forward_train(&input).unwrap().data(), &[0.0, 0.0, 0.5, 2.0]);

        let grad = relu.backward(&Tensor::ones(&[4])).unwrap();
        assert_eq!(grad.data(), &[0.0, 0.0, 1.0, 1.0]);
    }
}
