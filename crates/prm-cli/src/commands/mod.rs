//! CLI Command Implementations
//!
//! This module contains the implementations for all CLI subcommands:
//!
//! - [`train`]: Model training with best-checkpoint saving
//! - [`predict`]: Re-ranking a test file
//! - [`evaluate`]: Ranking metrics over prediction output
//!
//! Train and predict share [`ModelArgs`], which overrides values loaded
//! from an optional `--config` JSON file.

mod evaluate;
mod predict;
mod train;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use prm_core::{ModelType, RerankConfig};
use tracing::info;

pub use evaluate::EvaluateCommand;
pub use predict::PredictCommand;
pub use train::TrainCommand;

fn parse_model_type(value: &str) -> std::result::Result<ModelType, String> {
    let code: u8 = value
        .parse()
        .map_err(|_| format!("expected 0, 1 or 2, got '{}'", value))?;
    ModelType::try_from(code).map_err(|e| e.to_string())
}

/// Model and data-layout settings shared by `train` and `predict`.
///
/// Every flag is optional; unset flags keep the value from `--config` or
/// the built-in default.
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// JSON configuration file applied before the flags below
    #[arg(long, short = 'c', env = "PRM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Feature layout: 0 context only, 1 personalized v1, 2 personalized v2
    #[arg(long, value_parser = parse_model_type)]
    pub model_type: Option<ModelType>,

    /// Model checkpoint written by training and read by prediction
    #[arg(long)]
    pub saved_model_name: Option<PathBuf>,

    /// Rows per batch
    #[arg(long, short = 'b')]
    pub batch_size: Option<usize>,

    /// Candidate list length
    #[arg(long)]
    pub seq_len: Option<usize>,

    /// Field delimiter of the input files
    #[arg(long)]
    pub delimiter: Option<char>,

    /// Trailing width of the dense feature block
    #[arg(long)]
    pub d_feature: Option<usize>,

    /// Model width
    #[arg(long)]
    pub d_model: Option<usize>,

    /// Hidden width of the feed-forward sub-layer
    #[arg(long)]
    pub d_inner_hid: Option<usize>,

    /// Attention heads
    #[arg(long)]
    pub n_head: Option<usize>,

    /// Query/key width per head
    #[arg(long)]
    pub d_k: Option<usize>,

    /// Value width per head
    #[arg(long)]
    pub d_v: Option<usize>,

    /// Encoder blocks
    #[arg(long)]
    pub n_layers: Option<usize>,

    /// Dropout rate
    #[arg(long)]
    pub dropout: Option<f32>,

    /// Embedding width per categorical channel (model type 1)
    #[arg(long)]
    pub embedding_dim: Option<usize>,

    /// Hash buckets per categorical channel (model type 1)
    #[arg(long)]
    pub embedding_buckets: Option<usize>,

    /// Seed for weight initialization and dropout
    #[arg(long)]
    pub seed: Option<u64>,
}

impl ModelArgs {
    /// Loads `--config` (or the defaults) and applies the flags on top.
    ///
    /// The result is not validated yet; commands add their own overrides
    /// first.
    pub fn resolve(&self) -> Result<RerankConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading config from: {:?}", path);
                RerankConfig::from_json_file(path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            }
            None => RerankConfig::default(),
        };

        if let Some(model_type) = self.model_type {
            config.model_type = model_type;
        }
        if let Some(path) = &self.saved_model_name {
            config.paths.saved_model_name = path.clone();
        }
        set(&mut config.data.batch_size, self.batch_size);
        set(&mut config.data.seq_len, self.seq_len);
        set(&mut config.data.delimiter, self.delimiter);
        set(&mut config.model.d_feature, self.d_feature);
        set(&mut config.model.d_model, self.d_model);
        set(&mut config.model.d_inner_hid, self.d_inner_hid);
        set(&mut config.model.n_head, self.n_head);
        set(&mut config.model.d_k, self.d_k);
        set(&mut config.model.d_v, self.d_v);
        set(&mut config.model.n_layers, self.n_layers);
        set(&mut config.model.dropout, self.dropout);
        set(&mut config.model.embedding_dim, self.embedding_dim);
        set(&mut config.model.embedding_buckets, self.embedding_buckets);
        set(&mut config.model.seed, self.seed);
        Ok(config)
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_path(slot: &mut Option<PathBuf>, value: Option<&Path>) {
    if let Some(value) = value {
        *slot = Some(value.to_path_buf());
    }
}

/// Validates a fully resolved configuration.
fn validated(config: RerankConfig) -> Result<RerankConfig> {
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
