//! The personalized re-ranking network.
//!
//! ```text
//! x [B, L, d_input]
//!   -> Dense(d_input -> d_model) + position_embedding[positions]
//!   -> n_layers x EncoderBlock
//!   -> Dense(d_model -> 1)
//!   -> logits [B, L]
//! ```
//!
//! The list length `L` is fixed when the network is built.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::dense::Dense;
use crate::encoder::{EncoderBlock, EncoderConfig};
use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::{check_last_dim, scoped, Layer};
use crate::tensor::Tensor;

/// Shape and regularization settings of a [`PrmNetwork`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrmConfig {
    /// Fixed list length.
    pub seq_len: usize,
    /// Width of the assembled per-position input.
    pub d_input: usize,
    /// Model width.
    pub d_model: usize,
    /// Feed-forward hidden width.
    pub d_inner_hid: usize,
    /// Number of attention heads.
    pub n_head: usize,
    /// Query/key width per head.
    pub d_k: usize,
    /// Value width per head.
    pub d_v: usize,
    /// Number of encoder blocks.
    pub n_layers: usize,
    /// Dropout rate inside every block.
    pub dropout: f32,
    /// Seed for weight initialization and dropout masks.
    pub seed: u64,
}

impl PrmConfig {
    fn validate(&self) -> Result<(), LayerError> {
        let sizes = [
            ("seq_len", self.seq_len),
            ("d_input", self.d_input),
            ("d_model", self.d_model),
            ("d_inner_hid", self.d_inner_hid),
            ("n_head", self.n_head),
            ("d_k", self.d_k),
            ("d_v", self.d_v),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(LayerError::ConfigError {
                message: format!("{} must be positive", name),
            });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(LayerError::ConfigError {
                message: format!("dropout must be in [0, 1), got {}", self.dropout),
            });
        }
        Ok(())
    }

    fn encoder(&self) -> EncoderConfig {
        EncoderConfig {
            d_model: self.d_model,
            d_inner_hid: self.d_inner_hid,
            n_head: self.n_head,
            d_k: self.d_k,
            d_v: self.d_v,
            dropout: self.dropout,
        }
    }
}

/// Input projection, position embedding, encoder stack and scorer.
pub struct PrmNetwork {
    config: PrmConfig,
    input_projection: Dense,
    position_embedding: Tensor,
    position_grad: Option<Tensor>,
    cached_positions: Option<Vec<usize>>,
    blocks: Vec<EncoderBlock>,
    scorer: Dense,
}

impl PrmNetwork {
    /// Builds the network with Glorot-uniform weights drawn from `config.seed`.
    pub fn new(config: PrmConfig) -> Result<Self, LayerError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let input_projection = Dense::new(config.d_input, config.d_model, &mut rng);
        let position_embedding =
            Initializer::GlorotUniform.initialize(&[config.seq_len, config.d_model], &mut rng);
        let blocks = (0..config.n_layers)
            .map(|_| EncoderBlock::new(config.encoder(), &mut rng))
            .collect();
        let scorer = Dense::new(config.d_model, 1, &mut rng);

        debug!(
            seq_len = config.seq_len,
            d_input = config.d_input,
            d_model = config.d_model,
            n_layers = config.n_layers,
            "built re-ranking network"
        );

        Ok(Self {
            config,
            input_projection,
            position_embedding,
            position_grad: None,
            cached_positions: None,
            blocks,
            scorer,
        })
    }

    /// Returns the configuration the network was built with.
    pub fn config(&self) -> &PrmConfig {
        &self.config
    }

    /// Scores every position of every list. Returns `[batch, seq_len]` logits.
    ///
    /// `positions` holds one index per `(row, position)` pair in row-major
    /// order, each below `seq_len`.
    pub fn forward(&self, input: &Tensor, positions: &[usize]) -> Result<Tensor, LayerError> {
        let batch = self.check_input(input, positions)?;
        let mut hidden = self.input_projection.forward(input)?;
        self.add_positions(&mut hidden, positions);
        for block in &self.blocks {
            hidden = block.forward(&hidden)?;
        }
        let scores = self.scorer.forward(&hidden)?;
        Ok(scores.into_reshape(&[batch, self.config.seq_len]))
    }

    /// Training-mode forward pass; caches activations for [`PrmNetwork::backward`].
    pub fn forward_train(&mut self, input: &Tensor, positions: &[usize]) -> Result<Tensor, LayerError> {
        let batch = self.check_input(input, positions)?;
        let mut hidden = self.input_projection.forward_train(input)?;
        self.add_positions(&mut hidden, positions);
        self.cached_positions = Some(positions.to_vec());
        for block in &mut self.blocks {
            hidden = block.forward_train(&hidden)?;
        }
        let scores = self.scorer.forward_train(&hidden)?;
        Ok(scores.into_reshape(&[batch, self.config.seq_len]))
    }

    /// Back-propagates `dL/dlogits` (`[batch, seq_len]`) and returns the
    /// gradient with respect to the input.
    pub fn backward(&mut self, grad_logits: &Tensor) -> Result<Tensor, LayerError> {
        let positions = self
            .cached_positions
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        let d_model = self.config.d_model;
        if grad_logits.numel() != positions.len() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![positions.len() / self.config.seq_len, self.config.seq_len],
                actual: grad_logits.shape().to_vec(),
            });
        }

        let mut grad_shape = grad_logits.shape().to_vec();
        grad_shape.push(1);
        let mut grad = self.scorer.backward(&grad_logits.reshape(&grad_shape))?;
        for block in self.blocks.iter_mut().rev() {
            grad = block.backward(&grad)?;
        }

        let mut position_grad = Tensor::zeros(&[self.config.seq_len, d_model]);
        let dst = position_grad.data_mut();
        for (&pos, g) in positions.iter().zip(grad.data().chunks(d_model)) {
            for (d, v) in dst[pos * d_model..(pos + 1) * d_model].iter_mut().zip(g) {
                *d += v;
            }
        }
        self.position_grad = Some(position_grad);

        self.input_projection.backward(&grad)
    }

    /// Returns every learnable tensor, aligned with [`PrmNetwork::parameter_names`].
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.input_projection.parameters();
        params.push(&self.position_embedding);
        for block in &self.blocks {
            params.extend(block.parameters());
        }
        params.extend(self.scorer.parameters());
        params
    }

    /// Mutable counterpart of [`PrmNetwork::parameters`].
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.input_projection.parameters_mut();
        params.push(&mut self.position_embedding);
        for block in &mut self.blocks {
            params.extend(block.parameters_mut());
        }
        params.extend(self.scorer.parameters_mut());
        params
    }

    /// Most recent gradient of each parameter.
    pub fn gradients(&self) -> Vec<Option<&Tensor>> {
        let mut grads = self.input_projection.gradients();
        grads.push(self.position_grad.as_ref());
        for block in &self.blocks {
            grads.extend(block.gradients());
        }
        grads.extend(self.scorer.gradients());
        grads
    }

    /// Dotted names such as `blocks.0.attention.query.weights`.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = scoped("input_projection", self.input_projection.parameter_names());
        names.push("position_embedding".to_string());
        for (i, block) in self.blocks.iter().enumerate() {
            names.extend(scoped(&format!("blocks.{}", i), block.parameter_names()));
        }
        names.extend(scoped("scorer", self.scorer.parameter_names()));
        names
    }

    /// Switches dropout on or off in every block.
    pub fn set_training(&mut self, training: bool) {
        for block in &mut self.blocks {
            block.set_training(training);
        }
    }

    fn check_input(&self, input: &Tensor, positions: &[usize]) -> Result<usize, LayerError> {
        if input.ndim() != 3 || input.shape()[1] != self.config.seq_len {
            return Err(LayerError::ShapeMismatch {
                expected: vec![
                    input.shape().first().copied().unwrap_or(0),
                    self.config.seq_len,
                    self.config.d_input,
                ],
                actual: input.shape().to_vec(),
            });
        }
        check_last_dim(input, self.config.d_input)?;

        let batch = input.shape()[0];
        if positions.len() != batch * self.config.seq_len {
            return Err(LayerError::ShapeMismatch {
                expected: vec![batch, self.config.seq_len],
                actual: vec![positions.len()],
            });
        }
        if let Some(&bad) = positions.iter().find(|&&p| p >= self.config.seq_len) {
            return Err(LayerError::ForwardError {
                message: format!(
                    "position {} out of range for seq_len {}",
                    bad, self.config.seq_len
                ),
            });
        }
        Ok(batch)
    }

    fn add_positions(&self, hidden: &mut Tensor, positions: &[usize]) {
        let d_model = self.config.d_model;
        let table = self.position_embedding.data();
        for (&pos, row) in positions.iter().zip(hidden.data_mut().chunks_mut(d_model)) {
            for (h, e) in row.iter_mut().zip(&table[pos * d_model..(pos + 1) * d_model]) {
                *h += e;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_close, numeric_input_grad_with, random_tensor, weighted_sum_grad};

    fn config() -> PrmConfig {
        PrmConfig {
            seq_len: 3,
            d_input: 5,
            d_model: 4,
            d_inner_hid: 6,
            n_head: 2,
            d_k: 2,
            d_v: 2,
            n_layers: 2,
            dropout: 0.0,
            seed: 11,
        }
    }

    fn positions(batch: usize, seq_len: usize) -> Vec<usize> {
        (0..batch).flat_map(|_| 0..seq_len).collect()
    }

    #[test]
    fn test_logits_shape() {
        let net = PrmNetwork::new(config()).unwrap();
        let logits = net
            .forward(&random_tensor(&[4, 3, 5], 0), &positions(4, 3))
            .unwrap();
        assert_eq!(logits.shape(), &[4, 3]);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = PrmNetwork::new(config()).unwrap();
        let b = PrmNetwork::new(config()).unwrap();
        for (x, y) in a.parameters().iter().zip(b.parameters()) {
            assert_eq!(*x, y);
        }
    }

    #[test]
    fn test_rejects_wrong_list_length() {
        let net = PrmNetwork::new(config()).unwrap();
        let err = net.forward(&random_tensor(&[2, 4, 5], 0), &positions(2, 4));
        assert!(matches!(err, Err(LayerError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejects_out_of_range_position() {
        let net = PrmNetwork::new(config()).unwrap();
        let err = net.forward(&random_tensor(&[1, 3, 5], 0), &[0, 1, 3]);
        assert!(matches!(err, Err(LayerError::ForwardError { .. })));
    }

    #[test]
    fn test_rejects_zero_width() {
        let mut bad = config();
        bad.d_model = 0;
        assert!(matches!(
            PrmNetwork::new(bad),
            Err(LayerError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_parameter_bookkeeping() {
        let mut net = PrmNetwork::new(config()).unwrap();
        let names = net.parameter_names();
        assert_eq!(names.len(), net.parameters().len());
        assert_eq!(names.len(), net.parameters_mut().len());
        assert_eq!(names.len(), net.gradients().len());
        assert_eq!(names[0], "input_projection.weights");
        assert_eq!(names[2], "position_embedding");
        assert!(names.contains(&"blocks.1.ffn_norm.gamma".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("scorer.bias"));
    }

    #[test]
    fn test_input_gradient_matches_finite_differences() {
        let mut net = PrmNetwork::new(config()).unwrap();
        let input = random_tensor(&[2, 3, 5], 4);
        let pos = positions(2, 3);

        let logits = net.forward_train(&input, &pos).unwrap();
        let grad_in = net.backward(&weighted_sum_grad(logits.shape())).unwrap();
        let numeric = numeric_input_grad_with(&input, 1e-3, |x| net.forward(x, &pos).unwrap());
        assert_close(grad_in.data(), numeric.data(), 5e-2);
    }

    #[test]
    fn test_position_gradient_accumulates_over_rows() {
        let mut net = PrmNetwork::new(config()).unwrap();
        let input = random_tensor(&[2, 3, 5], 9);
        let logits = net.forward_train(&input, &positions(2, 3)).unwrap();
        net.backward(&weighted_sum_grad(logits.shape())).unwrap();

        let grads = net.gradients();
        let position_grad = grads[2].unwrap();
        assert_eq!(position_grad.shape(), &[3, 4]);
        assert!(position_grad.data().iter().any(|g| g.abs() > 0.0));
        assert!(grads.iter().all(Option::is_some));
    }

    #[test]
    fn test_backward_before_forward_train() {
        let mut net = PrmNetwork::new(config()).unwrap();
        assert!(matches!(
            net.backward(&Tensor::zeros(&[1, 3])),
            Err(LayerError::NotInitialized)
        ));
    }
}
