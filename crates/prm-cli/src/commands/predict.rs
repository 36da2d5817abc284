//! Predict Command Implementation
//!
//! Restores the trained checkpoint, scores every list of the test file and
//! writes the re-ranked labels to `<test-set>.predict.out`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use prm_core::RerankConfig;
use prm_data::{BatchStream, StreamMode, Tensorizer};
use prm_training::{load_model, RankingEvaluator};
use tracing::info;

use super::{set_path, validated, ModelArgs};

/// Re-rank a test file with a trained model
///
/// Exits with status 2 when `--saved-model-name` does not exist.
///
/// # Example
///
/// ```bash
/// prm predict --test-set test.txt --saved-model-name model/prm_model.json
/// ```
#[derive(Args, Debug, Clone)]
pub struct PredictCommand {
    /// Test data; predictions go to `<test-set>.predict.out`
    #[arg(long)]
    pub test_set: Option<PathBuf>,

    /// Model and data-layout settings
    #[command(flatten)]
    pub model: ModelArgs,
}

impl PredictCommand {
    /// Builds the validated run configuration.
    pub fn config(&self) -> Result<RerankConfig> {
        let mut config = self.model.resolve()?;
        set_path(&mut config.paths.test_set, self.test_set.as_deref());
        let config = validated(config)?;
        config.test_path().context("Prediction needs a test set")?;
        Ok(config)
    }

    /// Execute the predict command
    pub fn run(&self) -> Result<()> {
        let config = self.config()?;
        let test_set = config.test_path()?;
        info!("Loading model from: {:?}", config.paths.saved_model_name);

        let model = load_model(&config).with_context(|| {
            format!(
                "Failed to load model {}",
                config.paths.saved_model_name.display()
            )
        })?;
        let tensorizer = Tensorizer::from_config(&config)?;
        let evaluator = RankingEvaluator::new(&model, tensorizer)?;

        let mut stream = BatchStream::open(
            test_set,
            config.delimiter_byte(),
            StreamMode::Once,
            config.data.batch_size,
        )
        .with_context(|| format!("Failed to open {}", test_set.display()))?;

        let (output, report) = evaluator
            .run_for_test_set(&mut stream, test_set)
            .with_context(|| format!("Prediction on {} failed", test_set.display()))?;
        info!(
            "Wrote {} of {} lists to {:?}",
            report.rows_written, report.rows_seen, output
        );
        Ok(())
    }
}
