//! Weight initialization from a caller-owned random generator.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

/// How a parameter tensor is filled at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Initializer {
    /// Glorot/Xavier uniform initialization.
    #[default]
    GlorotUniform,
    /// Normal distribution with the given standard deviation.
    Normal {
        /// Standard deviation.
        std: f32,
    },
    /// All zeros.
    Zeros,
    /// All ones.
    Ones,
}

impl Initializer {
    /// Creates a tensor of `shape` filled according to this initializer.
    pub fn initialize<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> Tensor {
        let numel: usize = shape.iter().product();
        match self {
            Initializer::Zeros => Tensor::zeros(shape),
            Initializer::Ones => Tensor::ones(shape),
            Initializer::GlorotUniform => {
                let (fan_in, fan_out) = fan_in_out(shape);
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                let data = (0..numel).map(|_| rng.gen_range(-limit..=limit)).collect();
                Tensor::from_data(shape, data)
            }
            Initializer::Normal { std } => match Normal::new(0.0, *std) {
                Ok(normal) => {
                    let data = (0..numel).map(|_| normal.sample(&mut *rng)).collect();
                    Tensor::from_data(shape, data)
                }
                Err(_) => Tensor::zeros(shape),
            },
        }
    }
}

fn fan_in_out(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [rows, cols] => (*rows, *cols),
        [.., rows, cols] => {
            let receptive: usize = shape[..shape.len() - 2].iter().product();
            (rows * receptive, cols * receptive)
        }
    }
}
