//! Errors raised while building, training or evaluating a model.

use std::path::PathBuf;

use prm_checkpoint::CheckpointError;
use prm_core::{ModelType, PrmError};
use prm_data::DataError;
use prm_layers::LayerError;
use prm_optimizer::OptimizerError;
use thiserror::Error;

use crate::hooks::HookError;

/// Errors that can occur while training or evaluating.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] PrmError),

    /// Input decoding or streaming failed.
    #[error(transparent)]
    Data(#[from] DataError),

    /// The network rejected its input.
    #[error("Model error: {0}")]
    Layer(#[from] LayerError),

    /// The optimizer could not be created.
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    /// Saving or loading weights failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// A hook failed.
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// A feature bundle was built for another model mode.
    #[error("Model was built for model type {expected} but received a type {actual} batch")]
    ModeMismatch {
        /// Mode the model was built for.
        expected: ModelType,
        /// Mode of the bundle.
        actual: ModelType,
    },

    /// A feature bundle has another list length than the model.
    #[error("Model was built for seq_len {expected} but received seq_len {actual}")]
    SeqLenMismatch {
        /// List length the model was built for.
        expected: usize,
        /// List length of the bundle.
        actual: usize,
    },

    /// `train_step` was called before `compile`.
    #[error("Model must be compiled before training")]
    NotCompiled,

    /// Writing the prediction file failed.
    #[error("Failed to write {path}: {source}")]
    Io {
        /// Output file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line of a prediction file could not be parsed.
    #[error("Malformed prediction line {line}: {message}")]
    MalformedPrediction {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        message: String,
    },
}

impl TrainingError {
    /// Whether the error is a checkpoint that does not exist.
    pub fn is_missing_checkpoint(&self) -> bool {
        matches!(self, TrainingError::Checkpoint(e) if e.is_not_found())
    }
}

/// Result type for training operations.
pub type TrainingResult<T> = Result<T, TrainingError>;
