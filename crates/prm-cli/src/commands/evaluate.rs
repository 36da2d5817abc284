//! Evaluate Command Implementation
//!
//! Scores a prediction file written by `predict`, comparing the original
//! order of each list against the re-ranked order.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use prm_training::evaluate_predictions;
use tracing::info;

/// Compute ranking metrics over a prediction file
///
/// Prints MAP, NDCG@k and Precision@k for both orders as JSON.
///
/// # Example
///
/// ```bash
/// prm evaluate --predictions test.txt.predict.out --k 5 --k 10
/// ```
#[derive(Args, Debug, Clone)]
pub struct EvaluateCommand {
    /// Prediction file (`<test-set>.predict.out`)
    #[arg(long, short = 'p')]
    pub predictions: PathBuf,

    /// Cutoffs for NDCG and precision; repeat for several (default 5 and 10)
    #[arg(long = "k", short = 'k')]
    pub cutoffs: Vec<usize>,

    /// Write the report here instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

impl EvaluateCommand {
    /// Execute the evaluate command
    pub fn run(&self) -> Result<()> {
        info!("Evaluating predictions: {:?}", self.predictions);
        let report = evaluate_predictions(&self.predictions, &self.cutoffs)
            .with_context(|| format!("Failed to evaluate {}", self.predictions.display()))?;
        info!(
            lists = report.lists,
            original_map = report.original.map,
            reranked_map = report.reranked.map,
            "Evaluation complete"
        );

        let json = serde_json::to_string_pretty(&report)?;
        match &self.output {
            Some(path) => std::fs::write(path, json + "\n")
                .with_context(|| format!("Failed to write {}", path.display()))?,
            None => println!("{}", json),
        }
        Ok(())
    }
}
