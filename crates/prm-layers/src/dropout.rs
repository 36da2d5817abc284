//! Inverted dropout.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// Zeroes each element with probability `rate` during training and scales
/// the survivors by `1 / (1 - rate)`. Identity at inference.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    training: bool,
    mask: Option<Vec<f32>>,
    rng: StdRng,
}

impl Dropout {
    /// Creates a dropout layer with its own seeded generator.
    pub fn new(rate: f32, seed: u64) -> Self {
        Self {
            rate,
            training: true,
            mask: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns the drop probability.
    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Layer for Dropout {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.clone())
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        if !self.training || self.rate <= 0.0 {
            self.mask = None;
            return Ok(input.clone());
        }

        let keep = 1.0 - self.rate;
        let scale = 1.0 / keep;
        let mask: Vec<f32> = (0..input.numel())
            .map(|_| if self.rng.gen::<f32>() < keep { scale } else { 0.0 })
            .collect();
        let data = input.data().iter().zip(&mask).map(|(x, m)| x * m).collect();
        self.mask = Some(mask);
        Ok(Tensor::from_data(input.shape(), data))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        match &self.mask {
            None => Ok(grad.clone()),
            Some(mask) if mask.len() == grad.numel() => {
                let data = grad.data().iter().zip(mask).map(|(g, m)| g * m).collect();
                Ok(Tensor::from_data(grad.shape(), data))
            }
            Some(mask) => Err(LayerError::ShapeMismatch {
                expected: vec![mask.len()],
                actual: grad.shape().to_vec(),
            }),
        }
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
        "Dropout"
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_is_identity() {
        let dropout = Dropout::new(0.5, 0);
        let input = Tensor::ones(&[10]);
        assert_eq!(dropout.forward(&input).unwrap(), input);
    }

    #[test]
    fn test_training_mask_scales_survivors() {
        let mut dropout = Dropout::new(0.5, 3);
        let out = dropout.forward_train(&Tensor::ones(&[1000])).unwrap();
        assert!(out.data().iter().all(|&v| v == 0.0 || v == 2.0));
        let kept = out.data().iter().filter(|&&v| v > 0.0).count();
        assert!(kept > 400 && kept < 600);

        let grad = dropout.backward(&Tensor::ones(&[1000])).unwrap();
        assert_eq!(grad, out);
    }

    #[test]
    fn test_disabled_in_eval_mode() {
        let mut dropout = Dropout::new(0.5, 3);
        dropout.set_training(false);
        let input = Tensor::ones(&[8]);
        assert_eq!(dropout.forward_train(&input).unwrap(), input);
        assert_eq!(dropout.backward(&input).unwrap(), input);
    }
}
