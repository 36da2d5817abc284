//! Post-LN transformer encoder block.

use rand::Rng;

use crate::activation::Relu;
use crate::attention::MultiHeadSelfAttention;
use crate::dense::Dense;
use crate::dropout::Dropout;
use crate::error::LayerError;
use crate::layer::{scoped, Layer};
use crate::normalization::LayerNorm;
use crate::tensor::Tensor;

/// Hyperparameters of one encoder block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderConfig {
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
    /// Dropout rate on both sub-layer outputs.
    pub dropout: f32,
}

/// `h = LN(x + Drop(MHA(x)))`, then `y = LN(h + Drop(FFN(h)))`.
pub struct EncoderBlock {
    attention: MultiHeadSelfAttention,
    attention_dropout: Dropout,
    attention_norm: LayerNorm,
    ffn_inner: Dense,
    ffn_relu: Relu,
    ffn_outer: Dense,
    ffn_dropout: Dropout,
    ffn_norm: LayerNorm,
}

impl EncoderBlock {
    /// Creates a block. Dropout masks are seeded from `rng`.
    pub fn new<R: Rng + ?Sized>(config: EncoderConfig, rng: &mut R) -> Self {
        Self {
            attention: MultiHeadSelfAttention::new(
                config.d_model,
                config.n_head,
                config.d_k,
                config.d_v,
                rng,
            ),
            attention_dropout: Dropout::new(config.dropout, rng.gen()),
            attention_norm: LayerNorm::new(config.d_model),
            ffn_inner: Dense::new(config.d_model, config.d_inner_hid, rng),
            ffn_relu: Relu::new(),
            ffn_outer: Dense::new(config.d_inner_hid, config.d_model, rng),
            ffn_dropout: Dropout::new(config.dropout, rng.gen()),
            ffn_norm: LayerNorm::new(config.d_model),
        }
    }

    fn parametric(&self) -> [(&'static str, &dyn Layer); 5] {
        [
            ("attention", &self.attention),
            ("attention_norm", &self.attention_norm),
            ("ffn_inner", &self.ffn_inner),
            ("ffn_outer", &self.ffn_outer),
            ("ffn_norm", &self.ffn_norm),
        ]
    }
}

impl Layer for EncoderBlock {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let attended = self.attention.forward(input)?;
        let hidden = self.attention_norm.forward(&input.add(&attended))?;

        let inner = self.ffn_relu.forward(&self.ffn_inner.forward(&hidden)?)?;
        let outer = self.ffn_outer.forward(&inner)?;
        self.ffn_norm.forward(&hidden.add(&outer))
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let attended = self.attention.forward_train(input)?;
        let attended = self.attention_dropout.forward_train(&attended)?;
        let hidden = self.attention_norm.forward_train(&input.add(&attended))?;

        let inner = self.ffn_inner.forward_train(&hidden)?;
        let inner = self.ffn_relu.forward_train(&inner)?;
        let outer = self.ffn_outer.forward_train(&inner)?;
        let outer = self.ffn_dropout.forward_train(&outer)?;
        self.ffn_norm.forward_train(&hidden.add(&outer))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        // second residual: d(hidden + ffn(hidden))
        let d_sum = self.ffn_norm.backward(grad)?;
        let d_outer = self.ffn_dropout.backward(&d_sum)?;
        let d_inner = self.ffn_outer.backward(&d_outer)?;
        let d_inner = self.ffn_relu.backward(&d_inner)?;
        let mut d_hidden = self.ffn_inner.backward(&d_inner)?;
        d_hidden.add_assign(&d_sum);

        // first residual: d(x + mha(x))
        let d_sum = self.attention_norm.backward(&d_hidden)?;
        let d_attended = self.attention_dropout.backward(&d_sum)?;
        let mut d_input = self.attention.backward(&d_attended)?;
        d_input.add_assign(&d_sum);
        Ok(d_input)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.parametric()
            .into_iter()
            .flat_map(|(_, layer)| layer.parameters())
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.attention.parameters_mut();
        params.extend(self.attention_norm.parameters_mut());
        params.extend(self.ffn_inner.parameters_mut());
        params.extend(self.ffn_outer.parameters_mut());
        params.extend(self.ffn_norm.parameters_mut());
        params
    }

    fn gradients(&self) -> Vec<Option<&Tensor>> {
        self.parametric()
            .into_iter()
            .flat_map(|(_, layer)| layer.gradients())
            .collect()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parametric()
            .into_iter()
            .flat_map(|(name, layer)| scoped(name, layer.parameter_names()))
            .collect()
    }

    fn name(&self) -> &str {
        "EncoderBlock"
    }

    fn set_training(&mut self, training: bool) {
        self.attention_dropout.set_training(training);
        self.ffn_dropout.set_training(training);
    }
}
