//! Run configuration for the re-ranker.
//!
//! [`RerankConfig`] is the single configuration value for a training or
//! inference run. It deserializes from JSON with every field optional; missing
//! fields take the production defaults listed on each struct. Command-line
//! flags are layered on top by the CLI, and [`RerankConfig::validate`] is
//! called once before any file is opened.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PrmError, Result};
use crate::schema::FeatureSchema;

/// Suffix appended to the test-set path to name the prediction output file.
pub const PREDICTION_SUFFIX: &str = ".predict.out";

/// Which feature layout the model consumes.
///
/// The integer codes `0`, `1` and `2` are the values accepted on the command
/// line and in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ModelType {
    /// Position ids plus the interaction-vector block.
    ContextOnly,
    /// Position ids, user id, per-field ucf and icf channels, plus the
    /// interaction-vector block.
    PersonalizedV1,
    /// Position ids plus icf, iv and pv stacked on the feature axis.
    PersonalizedV2,
}

impl ModelType {
    /// Returns the integer code of this mode.
    pub fn code(self) -> u8 {
        match self {
            ModelType::ContextOnly => 0,
            ModelType::PersonalizedV1 => 1,
            ModelType::PersonalizedV2 => 2,
        }
    }
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::ContextOnly
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl TryFrom<u8> for ModelType {
    type Error = PrmError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ModelType::ContextOnly),
            1 => Ok(ModelType::PersonalizedV1),
            2 => Ok(ModelType::PersonalizedV2),
            code => Err(PrmError::InvalidModelType { code }),
        }
    }
}

impl From<ModelType> for u8 {
    fn from(model_type: ModelType) -> u8 {
        model_type.code()
    }
}

/// Input layout and batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Rows per batch. Default 512.
    pub batch_size: usize,
    /// Candidate list length. Default 30.
    pub seq_len: usize,
    /// Field delimiter of the input files. Default `|`.
    pub delimiter: char,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            seq_len: 30,
            delimiter: '|',
        }
    }
}

/// Sequence model hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Trailing width of the dense feature block. Default 7.
    pub d_feature: usize,
    /// Model width. Default 64.
    pub d_model: usize,
    /// Hidden width of the position-wise feed-forward network. Default 128.
    pub d_inner_hid: usize,
    /// Number of attention heads. Default 1.
    pub n_head: usize,
    /// Query/key width per head. Default 64.
    pub d_k: usize,
    /// Value width per head. Default 64.
    pub d_v: usize,
    /// Number of encoder blocks. Default 2.
    pub n_layers: usize,
    /// Dropout rate applied to each sub-layer output. Default 0.1.
    pub dropout: f32,
    /// Width of each categorical embedding in mode 1. Default 8.
    pub embedding_dim: usize,
    /// Hash buckets per categorical embedding table in mode 1. Default 1000.
    pub embedding_buckets: usize,
    /// Seed for weight initialization and dropout masks. Default 42.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            d_feature: 7,
            d_model: 64,
            d_inner_hid: 128,
            n_head: 1,
            d_k: 64,
            d_v: 64,
            n_layers: 2,
            dropout: 0.1,
            embedding_dim: 8,
            embedding_buckets: 1000,
            seed: 42,
        }
    }
}

/// Training loop budget, schedule and stopping policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Maximum number of epochs. Default 100.
    pub train_epochs: usize,
    /// Optimizer steps per epoch. Default 1000.
    pub train_steps_per_epoch: usize,
    /// Validation batches evaluated after each epoch. Default 2000.
    pub validation_steps: usize,
    /// Consecutive non-improving epochs tolerated before stopping; `None`
    /// (JSON `null`) trains for the full epoch budget. Default 10.
    pub early_stop_patience: Option<usize>,
    /// Warmup length of the learning-rate schedule, in steps. Default 4000.
    pub warmup_steps: u64,
    /// Emit a progress log line every N steps. Default 100.
    pub log_every_n_steps: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_epochs: 100,
            train_steps_per_epoch: 1000,
            validation_steps: 2000,
            early_stop_patience: Some(10),
            warmup_steps: 4000,
            log_every_n_steps: 100,
        }
    }
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Training data.
    pub train_set: Option<PathBuf>,
    /// Validation data.
    pub validation_set: Option<PathBuf>,
    /// Test data scored by `predict`.
    pub test_set: Option<PathBuf>,
    /// Model artifact written by training and read by prediction.
    pub saved_model_name: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            train_set: None,
            validation_set: None,
            test_set: None,
            saved_model_name: PathBuf::from("prm_model.json"),
        }
    }
}

/// Complete configuration of a re-ranking run.
///
/// # Example
///
/// ```
/// use prm_core::config::{ModelType, RerankConfig};
///
/// let config = RerankConfig::default()
///     .with_model_type(ModelType::PersonalizedV2)
///     .with_d_feature(24);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Feature layout consumed by the model.
    pub model_type: ModelType,
    /// Input layout and batching.
    pub data: DataConfig,
    /// Model hyperparameters.
    pub model: ModelConfig,
    /// Training loop settings.
    pub training: TrainingConfig,
    /// File locations.
    pub paths: PathsConfig,
    /// Feature group registry.
    pub schema: FeatureSchema,
}

impl RerankConfig {
    /// Reads a configuration from a JSON file.
    ///
    /// The result is not validated; call [`RerankConfig::validate`] after
    /// applying any overrides.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| PrmError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Sets the model type.
    pub fn with_model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }

    /// Sets the dense feature width.
    pub fn with_d_feature(mut self, d_feature: usize) -> Self {
        self.model.d_feature = d_feature;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.data.batch_size = batch_size;
        self
    }

    /// Sets the candidate list length.
    pub fn with_seq_len(mut self, seq_len: usize) -> Self {
        self.data.seq_len = seq_len;
        self
    }

    /// Sets the feature schema.
    pub fn with_schema(mut self, schema: FeatureSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Checks every setting that can be checked without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`PrmError::Config`] for non-positive sizes, an out-of-range
    /// dropout rate or a non-ASCII delimiter, and
    /// [`PrmError::FeatureWidthMismatch`] when `d_feature` disagrees with the
    /// schema for the active mode.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.data.batch_size),
            ("seq_len", self.data.seq_len),
            ("d_feature", self.model.d_feature),
            ("d_model", self.model.d_model),
            ("d_inner_hid", self.model.d_inner_hid),
            ("n_head", self.model.n_head),
            ("d_k", self.model.d_k),
            ("d_v", self.model.d_v),
            ("n_layers", self.model.n_layers),
            ("train_steps_per_epoch", self.training.train_steps_per_epoch),
            ("validation_steps", self.training.validation_steps),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PrmError::config(format!("{} must be positive", name)));
            }
        }
        if self.model_type == ModelType::PersonalizedV1
            && (self.model.embedding_dim == 0 || self.model.embedding_buckets == 0)
        {
            return Err(PrmError::config(
                "embedding_dim and embedding_buckets must be positive for model type 1",
            ));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(PrmError::config(format!(
                "dropout must be in [0, 1), got {}",
                self.model.dropout
            )));
        }
        if !self.data.delimiter.is_ascii() {
            return Err(PrmError::config(format!(
                "delimiter must be a single ASCII character, got '{}'",
                self.data.delimiter
            )));
        }
        self.schema
            .check_width(self.model_type, self.model.d_feature)
    }

    /// Returns the delimiter as the byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.data.delimiter as u8
    }

    /// Returns the training and validation paths.
    ///
    /// # Errors
    ///
    /// Returns [`PrmError::MissingPath`] if either is unset.
    pub fn training_paths(&self) -> Result<(&Path, &Path)> {
        let train = self
            .paths
            .train_set
            .as_deref()
            .ok_or(PrmError::MissingPath { name: "train_set" })?;
        let validation = self
            .paths
            .validation_set
            .as_deref()
            .ok_or(PrmError::MissingPath {
                name: "validation_set",
            })?;
        Ok((train, validation))
    }

    /// Returns the test-set path.
    pub fn test_path(&self) -> Result<&Path> {
        self.paths
            .test_set
            .as_deref()
            .ok_or(PrmError::MissingPath { name: "test_set" })
    }

    /// Returns `<test_set>.predict.out`.
    pub fn prediction_output_path(&self) -> Result<PathBuf> {
        Ok(prediction_output_path(self.test_path()?))
    }
}

/// Derives the prediction output path for a test file.
pub fn prediction_output_path(test_set: &Path) -> PathBuf {
    let mut name = OsString::from(test_set.as_os_str());
    name.push(PREDICTION_SUFFIX);
    PathBuf::from(name)
}
