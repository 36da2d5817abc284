//! Optimizers for the re-ranking network.
//!
//! Each optimizer implements the [`Optimizer`] trait and updates one flat
//! parameter buffer in place. A model keeps one optimizer instance per
//! parameter tensor so that moment estimates never mix between tensors.
//! The learning rate is driven from outside by a [`LearningRateSchedule`].
//!
//! # Available Optimizers
//!
//! - [`Sgd`] - Stochastic Gradient Descent
//! - [`Adam`] - Adaptive Moment Estimation
//!
//! # Example
//!
//! ```
//! use prm_optimizer::{LearningRateSchedule, Optimizer, OptimizerConfig, Adam, WarmupInverseSqrt};
//!
//! let schedule = WarmupInverseSqrt::new(64, 4000);
//! let mut adam = Adam::new(OptimizerConfig::transformer_adam()).unwrap();
//!
//! let mut weights = vec![1.0, 2.0, 3.0];
//! adam.set_learning_rate(schedule.rate(1));
//! adam.apply_gradients(&mut weights, &[0.1, 0.2, 0.3]);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod adam;
mod schedule;
mod sgd;

pub use adam::Adam;
pub use schedule::{ConstantRate, LearningRateSchedule, WarmupInverseSqrt};
pub use sgd::Sgd;

/// Errors that can occur when working with optimizers.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Configuration type does not match the optimizer type.
    #[error("Config mismatch: expected {expected}, got {got}")]
    ConfigMismatch {
        /// Optimizer that was being built.
        expected: String,
        /// Variant that was supplied.
        got: String,
    },

    /// Invalid configuration parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Configuration for the supported optimizer types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizerConfig {
    /// Stochastic Gradient Descent configuration.
    Sgd {
        /// Learning rate for gradient updates.
        learning_rate: f32,
    },

    /// Adam configuration.
    Adam {
        /// Learning rate for gradient updates.
        learning_rate: f32,
        /// Exponential decay rate for first moment estimates.
        beta1: f32,
        /// Exponential decay rate for second moment estimates.
        beta2: f32,
        /// Small constant for numerical stability.
        epsilon: f32,
    },
}

impl OptimizerConfig {
    /// Adam with `beta1 = 0.9`, `beta2 = 0.98`, `epsilon = 1e-9`.
    ///
    /// The learning rate starts at zero; the schedule sets it every step.
    pub fn transformer_adam() -> Self {
        OptimizerConfig::Adam {
            learning_rate: 0.0,
            beta1: 0.9,
            beta2: 0.98,
            epsilon: 1e-9,
        }
    }

    /// Returns the name of the optimizer type.
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerConfig::Sgd { .. } => "Sgd",
            OptimizerConfig::Adam { .. } => "Adam",
        }
    }

    /// Returns the configured learning rate.
    pub fn learning_rate(&self) -> f32 {
        match self {
            OptimizerConfig::Sgd { learning_rate } => *learning_rate,
            OptimizerConfig::Adam { learning_rate, .. } => *learning_rate,
        }
    }

    /// Checks that every hyperparameter is in range.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::InvalidParameter`] naming the first bad value.
    pub fn validate(&self) -> Result<(), OptimizerError> {
        let learning_rate = self.learning_rate();
        if learning_rate.is_nan() || learning_rate < 0.0 {
            return Err(OptimizerError::InvalidParameter(format!(
                "learning_rate must be non-negative, got {}",
                learning_rate
            )));
        }
        if let OptimizerConfig::Adam {
            beta1,
            beta2,
            epsilon,
            ..
        } = self
        {
            for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
                if !(0.0..1.0).contains(beta) {
                    return Err(OptimizerError::InvalidParameter(format!(
                        "{} must be in [0, 1), got {}",
                        name, beta
                    )));
                }
            }
            if epsilon.is_nan() || *epsilon <= 0.0 {
                return Err(OptimizerError::InvalidParameter(format!(
                    "epsilon must be positive, got {}",
                    epsilon
                )));
            }
        }
        Ok(())
    }
}

/// Trait for parameter optimizers.
pub trait Optimizer: Sized {
    /// Creates a new optimizer from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::ConfigMismatch`] if the configuration type
    /// does not match the optimizer type, or
    /// [`OptimizerError::InvalidParameter`] if a value is out of range.
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError>;

    /// Applies `gradients` to `params` in place.
    ///
    /// # Panics
    ///
    /// May panic if `params` and `gradients` have different lengths.
    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]);

    /// Replaces the learning rate used by subsequent updates.
    fn set_learning_rate(&mut self, learning_rate: f32);

    /// Returns the learning rate currently in effect.
    fn learning_rate(&self) -> f32;

    /// Returns a reference to the optimizer's configuration.
    fn config(&self) -> &OptimizerConfig;
}

/// Creates an optimizer from the given configuration.
///
/// # Example
///
/// ```
/// use prm_optimizer::{create_optimizer, OptimizerConfig};
///
/// let mut optimizer = create_optimizer(OptimizerConfig::transformer_adam()).unwrap();
/// optimizer.set_learning_rate(0.01);
/// ```
pub fn create_optimizer(config: OptimizerConfig) -> Result<Box<dyn OptimizerDyn>, OptimizerError> {
    Ok(match &config {
        OptimizerConfig::Sgd { .. } => Box::new(Sgd::new(config)?),
        OptimizerConfig::Adam { .. } => Box::new(Adam::new(config)?),
    })
}

/// Dynamic dispatch version of the Optimizer trait.
pub trait OptimizerDyn: Send {
    /// Applies `gradients` to `params` in place.
    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]);

    /// Replaces the learning rate used by subsequent updates.
    fn set_learning_rate(&mut self, learning_rate: f32);

    /// Returns the learning rate currently in effect.
    fn learning_rate(&self) -> f32;

    /// Returns a reference to the optimizer's configuration.
    fn config(&self) -> &OptimizerConfig;
}

impl<T: Optimizer + Send> OptimizerDyn for T {
    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]) {
        Optimizer::apply_gradients(self, params, gradients)
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        Optimizer::set_learning_rate(self, learning_rate)
    }

    fn learning_rate(&self) -> f32 {
        Optimizer::learning_rate(self)
    }

    fn config(&self) -> &OptimizerConfig {
        Optimizer::config(self)
    }
}
