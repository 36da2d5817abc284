//! Adam optimizer.
//!
//! Keeps exponential moving averages of the gradient (first moment) and of
//! the squared gradient (second moment) for every element of one parameter
//! buffer.

use crate::{Optimizer, OptimizerConfig, OptimizerError};
use serde::{Deserialize, Serialize};

/// Adam optimizer with bias-corrected moment estimates.
///
/// ```text
/// m = beta1 * m + (1 - beta1) * g
/// v = beta2 * v + (1 - beta2) * g^2
/// m_hat = m / (1 - beta1^t)
/// v_hat = v / (1 - beta2^t)
/// p = p - learning_rate * m_hat / (sqrt(v_hat) + epsilon)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Vec<f32>,
    v: Vec<f32>,
    /// Number of updates applied so far.
    t: u64,
    config: OptimizerConfig,
}

impl Adam {
    /// Returns the current first moment state.
    pub fn first_moment(&self) -> &[f32] {
        &self.m
    }

    /// Returns the current second moment state.
    pub fn second_moment(&self) -> &[f32] {
        &self.v
    }

    /// Returns the current timestep.
    pub fn timestep(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        match config {
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                config.validate()?;
                Ok(Self {
                    learning_rate,
                    beta1,
                    beta2,
                    epsilon,
                    m: Vec::new(),
                    v: Vec::new(),
                    t: 0,
                    config,
                })
            }
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Adam".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]) {
        if self.m.len() != params.len() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
        }

        self.t += 1;
        let t = self.t.min(i32::MAX as u64) as i32;
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2 = 1.0 - self.beta2.powi(t);

        for ((p, g), (m, v)) in params
            .iter_mut()
            .zip(gradients)
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
        {
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;

            let m_hat = *m / bias_correction1;
            let v_hat = *v / bias_correction2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
        if let OptimizerConfig::Adam {
            learning_rate: configured,
            ..
        } = &mut self.config
        {
            *configured = learning_rate;
        }
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adam(learning_rate: f32) -> Adam {
        Adam::new(OptimizerConfig::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.98,
            epsilon: 1e-9,
        })
        .unwrap()
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut opt = adam(0.1);
        let mut params = vec![1.0, 2.0, 3.0];
        opt.apply_gradients(&mut params, &[1.0, -2.0, 0.5]);

        // With bias correction the first step is lr * sign(g).
        assert!((params[0] - 0.9).abs() < 1e-5);
        assert!((params[1] - 2.1).abs() < 1e-5);
        assert!((params[2] - 2.9).abs() < 1e-5);
    }

    #[test]
    fn test_timestep_increment() {
        let mut opt = adam(0.001);
        let mut params = vec![1.0];
        assert_eq!(opt.timestep(), 0);
        opt.apply_gradients(&mut params, &[1.0]);
        opt.apply_gradients(&mut params, &[1.0]);
        assert_eq!(opt.timestep(), 2);
        assert!(opt.first_moment()[0] > 0.0);
        assert!(opt.second_moment()[0] > 0.0);
    }

    #[test]
    fn test_zero_learning_rate_is_frozen() {
        let mut opt = adam(0.0);
        let mut params = vec![1.0, 2.0];
        opt.apply_gradients(&mut params, &[3.0, -3.0]);
        assert_eq!(params, vec![1.0, 2.0]);
    }

    #[test]
    fn test_set_learning_rate_updates_config() {
        let mut opt = adam(0.0);
        opt.set_learning_rate(0.25);
        assert_eq!(opt.learning_rate(), 0.25);
        assert_eq!(opt.config().learning_rate(), 0.25);
    }

    #[test]
    fn test_config_mismatch() {
        let result = Adam::new(OptimizerConfig::Sgd { learning_rate: 0.01 });
        assert!(matches!(result, Err(OptimizerError::ConfigMismatch { .. })));
    }
}
