//! Train Command Implementation
//!
//! Fits a re-ranking model on a training file, validating after every epoch
//! against a validation file. The checkpoint with the lowest validation loss
//! is kept at `--saved-model-name`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use prm_core::RerankConfig;
use prm_data::{BatchStream, StreamMode};
use prm_training::Trainer;
use tracing::info;

use super::{set, set_path, validated, ModelArgs};

/// Train a re-ranking model
///
/// # Example
///
/// ```bash
/// prm train \
///     --train-set train.txt \
///     --validation-set validation.txt \
///     --train-epochs 100 \
///     --early-stop-patience 5
/// ```
#[derive(Args, Debug, Clone)]
pub struct TrainCommand {
    /// Training data
    #[arg(long)]
    pub train_set: Option<PathBuf>,

    /// Validation data
    #[arg(long)]
    pub validation_set: Option<PathBuf>,

    /// Maximum number of epochs
    #[arg(long)]
    pub train_epochs: Option<usize>,

    /// Optimizer steps per epoch
    #[arg(long)]
    pub train_steps_per_epoch: Option<usize>,

    /// Validation batches per epoch
    #[arg(long)]
    pub validation_steps: Option<usize>,

    /// Epochs without improvement before stopping (0 stops at the first)
    #[arg(long)]
    pub early_stop_patience: Option<usize>,

    /// Train for the full epoch budget
    #[arg(long, conflicts_with = "early_stop_patience")]
    pub no_early_stopping: bool,

    /// Warmup steps of the learning-rate schedule
    #[arg(long, alias = "lr-per-step")]
    pub warmup_steps: Option<u64>,

    /// Log training metrics every N steps
    #[arg(long)]
    pub log_every_n_steps: Option<u64>,

    /// Model and data-layout settings
    #[command(flatten)]
    pub model: ModelArgs,
}

impl TrainCommand {
    /// Builds the validated run configuration.
    pub fn config(&self) -> Result<RerankConfig> {
        let mut config = self.model.resolve()?;
        set_path(&mut config.paths.train_set, self.train_set.as_deref());
        set_path(&mut config.paths.validation_set, self.validation_set.as_deref());
        set(&mut config.training.train_epochs, self.train_epochs);
        set(
            &mut config.training.train_steps_per_epoch,
            self.train_steps_per_epoch,
        );
        set(&mut config.training.validation_steps, self.validation_steps);
        if self.no_early_stopping {
            config.training.early_stop_patience = None;
        } else if let Some(patience) = self.early_stop_patience {
            config.training.early_stop_patience = Some(patience);
        }
        set(&mut config.training.warmup_steps, self.warmup_steps);
        set(&mut config.training.log_every_n_steps, self.log_every_n_steps);
        let config = validated(config)?;
        config.training_paths().context("Training needs both data sets")?;
        Ok(config)
    }

    /// Execute the train command
    pub fn run(&self) -> Result<()> {
        let config = self.config()?;
        let (train_path, validation_path) = config.training_paths()?;
        info!("Starting training...");
        info!("Model type: {}", config.model_type);
        info!("Saved model: {:?}", config.paths.saved_model_name);

        let open = |path: &std::path::Path| {
            BatchStream::open(
                path,
                config.delimiter_byte(),
                StreamMode::Forever,
                config.data.batch_size,
            )
            .with_context(|| format!("Failed to open {}", path.display()))
        };
        let mut train = open(train_path)?;
        let mut validation = open(validation_path)?;

        let mut trainer = Trainer::from_config(&config).context("Failed to build the model")?;
        let report = trainer
            .fit(&mut train, &mut validation)
            .with_context(|| format!("Training on {} failed", train_path.display()))?;

        match report.best_val_loss() {
            Some(best) => info!(
                "Training finished after {} epochs, best val_loss = {:.6}",
                report.history.len(),
                best
            ),
            None => info!("Training finished after {} epochs", report.history.len()),
        }
        Ok(())
    }
}
