//! Neural network layers for the personalized re-ranker.
//!
//! Every layer runs on the row-major [`Tensor`] and carries a hand-written
//! backward pass, so the whole model trains without an autodiff engine:
//!
//! - **Dense**: fully connected projections over the last axis
//! - **Attention**: multi-head self-attention across a candidate list
//! - **Encoder**: post-LN transformer blocks (attention + FFN)
//! - **Normalization**: layer normalization
//! - **Embeddings**: hashed lookup tables for categorical ids
//! - **Loss**: list-wise softmax cross-entropy
//! - **PRM**: the assembled re-ranking network
//!
//! # Quick Start
//!
//! ```
//! use prm_layers::prelude::*;
//!
//! let config = PrmConfig {
//!     seq_len: 4,
//!     d_input: 7,
//!     d_model: 8,
//!     d_inner_hid: 16,
//!     n_head: 2,
//!     d_k: 4,
//!     d_v: 4,
//!     n_layers: 1,
//!     dropout: 0.1,
//!     seed: 42,
//! };
//! let network = PrmNetwork::new(config).unwrap();
//!
//! let input = Tensor::zeros(&[2, 4, 7]);
//! let positions: Vec<usize> = (0..2).flat_map(|_| 0..4).collect();
//! let logits = network.forward(&input, &positions).unwrap();
//! assert_eq!(logits.shape(), &[2, 4]);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod activation;
pub mod attention;
pub mod dense;
pub mod dropout;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod initializer;
pub mod layer;
pub mod loss;
pub mod normalization;
pub mod prm;
pub mod tensor;

#[cfg(test)]
mod testing;

pub use activation::Relu;
pub use attention::MultiHeadSelfAttention;
pub use dense::Dense;
pub use dropout::Dropout;
pub use embedding::HashedEmbedding;
pub use encoder::{EncoderBlock, EncoderConfig};
pub use error::{LayerError, LayerResult};
pub use initializer::Initializer;
pub use layer::Layer;
pub use loss::{list_softmax, softmax_cross_entropy, LossOutput};
pub use normalization::LayerNorm;
pub use prm::{PrmConfig, PrmNetwork};
pub use tensor::Tensor;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::dense::Dense;
    pub use crate::embedding::HashedEmbedding;
    pub use crate::error::{LayerError, LayerResult};
    pub use crate::layer::Layer;
    pub use crate::loss::{list_softmax, softmax_cross_entropy, LossOutput};
    pub use crate::prm::{PrmConfig, PrmNetwork};
    pub use crate::tensor::Tensor;
}
