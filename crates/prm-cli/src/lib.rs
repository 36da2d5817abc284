//! PRM CLI Library
//!
//! This crate provides the command-line interface for the PRM re-ranker:
//!
//! - **Train**: fit a model and keep the checkpoint with the lowest validation loss
//! - **Predict**: re-rank a test file with a trained checkpoint
//! - **Evaluate**: compute MAP, NDCG@k and Precision@k over a prediction file
//!
//! # Example
//!
//! ```bash
//! # Train a model
//! prm train --train-set train.txt --validation-set validation.txt \
//!     --model-type 2 --d-feature 24 --saved-model-name model/prm_model.json
//!
//! # Re-rank a test file into test.txt.predict.out
//! prm predict --test-set test.txt --model-type 2 --d-feature 24 \
//!     --saved-model-name model/prm_model.json
//!
//! # Score the re-ranked output
//! prm evaluate --predictions test.txt.predict.out --k 5 --k 10
//! ```

pub mod commands;

use clap::{Parser, Subcommand};

pub use commands::{EvaluateCommand, ModelArgs, PredictCommand, TrainCommand};

/// Exit status for a run that failed.
pub const EXIT_FAILURE: u8 = 1;

/// Exit status when `predict` finds no trained model.
pub const EXIT_MISSING_MODEL: u8 = 2;

/// PRM - personalized re-ranking of recommendation lists
///
/// Trains a transformer re-ranker over candidate lists, re-ranks test lists
/// with it, and measures how much the new order improves them.
#[derive(Parser, Debug)]
#[command(name = "prm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model and save the best checkpoint
    Train(TrainCommand),

    /// Re-rank a test file with a trained model
    Predict(PredictCommand),

    /// Compute ranking metrics over a prediction file
    Evaluate(EvaluateCommand),
}

impl Cli {
    /// Runs the selected command.
    pub fn run(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Train(cmd) => cmd.run(),
            Commands::Predict(cmd) => cmd.run(),
            Commands::Evaluate(cmd) => cmd.run(),
        }
    }
}

/// Maps a failed run to its process exit status.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    let missing_model = err.chain().any(|cause| {
        cause
            .downcast_ref::<prm_training::TrainingError>()
            .map_or(false, prm_training::TrainingError::is_missing_checkpoint)
    });
    if missing_model {
        EXIT_MISSING_MODEL
    } else {
        EXIT_FAILURE
    }
}
