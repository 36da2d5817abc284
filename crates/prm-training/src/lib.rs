//! Model, training loop and ranking evaluation for the PRM re-ranker.
//!
//! This crate ties the data pipeline, the network and the checkpoint format
//! together:
//!
//! - **Model**: [`PrmModel`], the transformer re-ranker behind the
//!   [`SequenceModel`] contract
//! - **Trainer**: epoch loop with a warmup learning-rate schedule and
//!   per-epoch validation
//! - **Hooks**: logging, best-checkpoint saving and early stopping
//! - **Evaluator**: re-ranks a test file and writes `.predict.out` lines
//! - **Ranking metrics**: MAP, NDCG@k and Precision@k over prediction files
//!
//! # Architecture
//!
//! ```text
//! BatchStream ──► Tensorizer ──► Trainer ──► PrmModel ──► BestCheckpointHook
//!                                   │                          │
//!                                   ▼                          ▼
//!                               HookList                 prm_model.json
//!
//! prm_model.json ──► PrmModel ──► RankingEvaluator ──► <test>.predict.out
//! ```
//!
//! # Example
//!
//! ```no_run
//! use prm_core::RerankConfig;
//! use prm_data::{BatchStream, StreamMode};
//! use prm_training::Trainer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RerankConfig::default();
//! let (train_path, validation_path) = config.training_paths()?;
//! let open = |path: &std::path::Path| {
//!     let (delimiter, batch_size) = (config.delimiter_byte(), config.data.batch_size);
//!     BatchStream::open(path, delimiter, StreamMode::Forever, batch_size)
//! };
//!
//! let mut trainer = Trainer::from_config(&config)?;
//! let report = trainer.fit(&mut open(train_path)?, &mut open(validation_path)?)?;
//! println!("best val_loss: {:?}", report.best_val_loss());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod evaluator;
pub mod hooks;
pub mod metrics;
pub mod model;
pub mod ranking_metrics;
pub mod trainer;

#[cfg(test)]
mod testing;

pub use error::{TrainingError, TrainingResult};
pub use evaluator::{argsort_desc, rerank, EvaluationReport, RankedOutputRecord, RankingEvaluator};
pub use hooks::{
    BestCheckpointHook, EarlyStoppingHook, Hook, HookAction, HookError, HookList, HookResult,
    LoggingHook,
};
pub use metrics::{Metrics, MetricsRecorder};
pub use model::{PredictionMatrix, PrmModel, SequenceModel, StepOutput};
pub use ranking_metrics::{
    average_precision, evaluate_predictions, ndcg_at_k, precision_at_k, ranking_report,
    RankingReport, RankingSummary, DEFAULT_CUTOFFS,
};
pub use trainer::{EpochSummary, TrainReport, Trainer, TrainerState};

/// Loads a trained model for inference.
///
/// Builds a [`PrmModel`] from `config` and restores the weights stored at
/// `paths.saved_model_name`. The checkpoint must match the configured mode,
/// list length and feature width.
///
/// # Errors
///
/// Returns [`TrainingError::Checkpoint`] wrapping
/// [`prm_checkpoint::CheckpointError::NotFound`] if no checkpoint exists.
pub fn load_model(config: &prm_core::RerankConfig) -> TrainingResult<PrmModel> {
    use prm_checkpoint::{Checkpointer, JsonCheckpointer};

    let state = JsonCheckpointer::new().restore(&config.paths.saved_model_name)?;
    let mut model = PrmModel::build(config)?;
    model.load_state(&state)?;
    Ok(model)
}
