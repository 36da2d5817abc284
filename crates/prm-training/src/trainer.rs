//! Epoch-based training loop.
//!
//! The [`Trainer`] pulls batches from a training stream, runs one optimizer
//! step per batch with the warmup learning-rate schedule, validates after
//! every epoch and hands the epoch summary to its hooks, which decide about
//! checkpointing and early stopping.

use prm_core::{RerankConfig, TrainingConfig};
use prm_data::{BatchStream, DataError, TensorBatch, Tensorizer};
use prm_optimizer::{LearningRateSchedule, OptimizerConfig, WarmupInverseSqrt};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{TrainingError, TrainingResult};
use crate::hooks::{BestCheckpointHook, EarlyStoppingHook, Hook, HookAction, HookList, LoggingHook};
use crate::metrics::{Metrics, MetricsRecorder};
use crate::model::{PrmModel, SequenceModel};

/// Lifecycle of a [`Trainer`].
///
/// Building and compiling the model happen before a `Trainer` exists, inside
/// [`Trainer::from_config`], so every trainer starts out `Compiled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    /// Model and optimizer are ready.
    Compiled,
    /// Inside the loop.
    Training {
        /// 1-based epoch.
        epoch: usize,
        /// Global optimizer step.
        step: u64,
    },
    /// The loop has finished.
    Done,
}

/// Results of one epoch, passed to hooks and kept in the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochSummary {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Global step at the end of the epoch.
    pub global_step: u64,
    /// Row-weighted mean training loss.
    pub train_loss: f64,
    /// Row-weighted mean training accuracy.
    pub train_accuracy: f64,
    /// Validation loss, if any validation rows were seen.
    pub val_loss: Option<f64>,
    /// Validation accuracy, if any validation rows were seen.
    pub val_accuracy: Option<f64>,
    /// Learning rate of the last step.
    pub learning_rate: f64,
    /// Whether a hook wrote a checkpoint for this epoch.
    pub checkpoint_saved: bool,
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainReport {
    /// One summary per completed epoch.
    pub history: Vec<EpochSummary>,
    /// Whether a hook ended training before `train_epochs`.
    pub stopped_early: bool,
    /// Final global step.
    pub global_step: u64,
}

impl TrainReport {
    /// Lowest validation loss over all epochs.
    pub fn best_val_loss(&self) -> Option<f64> {
        self.history
            .iter()
            .filter_map(|s| s.val_loss)
            .fold(None, |best, v| Some(best.map_or(v, |b: f64| b.min(v))))
    }
}

/// Drives a [`SequenceModel`] through epochs of training and validation.
pub struct Trainer<M: SequenceModel> {
    config: TrainingConfig,
    tensorizer: Tensorizer,
    model: M,
    schedule: Box<dyn LearningRateSchedule>,
    hooks: HookList,
    state: TrainerState,
}

impl Trainer<PrmModel> {
    /// Builds and compiles a [`PrmModel`] and registers the default hooks:
    /// logging, best-checkpoint to `paths.saved_model_name`, and early
    /// stopping.
    pub fn from_config(config: &RerankConfig) -> TrainingResult<Self> {
        config.validate()?;
        let tensorizer = Tensorizer::from_config(config)?;

        debug!(model_type = %config.model_type, "Building model");
        let mut model = PrmModel::build(config)?;
        model.compile(OptimizerConfig::transformer_adam())?;

        let schedule = WarmupInverseSqrt::new(config.model.d_model, config.training.warmup_steps);
        let mut trainer = Self::with_model(
            config.training.clone(),
            tensorizer,
            model,
            Box::new(schedule),
        );
        trainer.add_hook(LoggingHook::new(config.training.log_every_n_steps));
        trainer.add_hook(BestCheckpointHook::new(&config.paths.saved_model_name));
        if let Some(patience) = config.training.early_stop_patience {
            trainer.add_hook(EarlyStoppingHook::new(patience));
        }
        Ok(trainer)
    }
}

impl<M: SequenceModel> Trainer<M> {
    /// Wraps an already compiled model. No hooks are registered.
    pub fn with_model(
        config: TrainingConfig,
        tensorizer: Tensorizer,
        model: M,
        schedule: Box<dyn LearningRateSchedule>,
    ) -> Self {
        Self {
            config,
            tensorizer,
            model,
            schedule,
            hooks: HookList::new(),
            state: TrainerState::Compiled,
        }
    }

    /// Adds a training hook.
    pub fn add_hook<H: Hook + 'static>(&mut self, hook: H) {
        self.hooks.add(hook);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// The model being trained.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Consumes the trainer and returns the model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Runs up to `train_epochs` epochs.
    ///
    /// Each epoch takes `train_steps_per_epoch` batches from `train`, or
    /// fewer if the stream ends, then evaluates up to `validation_steps`
    /// batches from `validation`. Both streams keep their position across
    /// epochs.
    ///
    /// # Errors
    ///
    /// Any decoding, model or hook error aborts training. A finished stream
    /// is not an error.
    pub fn fit(
        &mut self,
        train: &mut BatchStream,
        validation: &mut BatchStream,
    ) -> TrainingResult<TrainReport> {
        info!(
            epochs = self.config.train_epochs,
            steps_per_epoch = self.config.train_steps_per_epoch,
            validation_steps = self.config.validation_steps,
            "Starting training"
        );

        let mut report = TrainReport::default();
        for epoch in 1..=self.config.train_epochs {
            self.state = TrainerState::Training {
                epoch,
                step: self.model.global_step(),
            };
            self.hooks.before_epoch(epoch)?;

            let (recorder, learning_rate, steps) = self.train_epoch(train)?;
            if steps == 0 {
                info!(epoch, "Training stream exhausted");
                break;
            }

            let validation_metrics = self.validate(validation)?;
            let mut summary = EpochSummary {
                epoch,
                global_step: self.model.global_step(),
                train_loss: recorder.average_loss().unwrap_or(0.0),
                train_accuracy: recorder.average_accuracy().unwrap_or(0.0),
                val_loss: validation_metrics.average_loss(),
                val_accuracy: validation_metrics.average_accuracy(),
                learning_rate: f64::from(learning_rate),
                checkpoint_saved: false,
            };

            let action = self.hooks.after_epoch(&mut summary, &self.model)?;
            report.history.push(summary);
            if action == HookAction::Stop {
                info!(epoch, "Training stopped by hook");
                report.stopped_early = true;
                break;
            }
            if steps < self.config.train_steps_per_epoch {
                info!(epoch, steps, "Training stream exhausted");
                break;
            }
        }

        report.global_step = self.model.global_step();
        self.hooks.end(report.global_step, report.history.last())?;
        self.state = TrainerState::Done;
        info!(
            epochs = report.history.len(),
            step = report.global_step,
            stopped_early = report.stopped_early,
            "Training complete"
        );
        Ok(report)
    }

    fn train_epoch(
        &mut self,
        train: &mut BatchStream,
    ) -> TrainingResult<(MetricsRecorder, f32, usize)> {
        let mut recorder = MetricsRecorder::new();
        let mut learning_rate = 0.0;
        let mut steps = 0;

        while steps < self.config.train_steps_per_epoch {
            let Some(batch) = next_tensor_batch(train, &self.tensorizer)? else {
                break;
            };
            let step = self.model.global_step() + 1;
            learning_rate = self.schedule.rate(step);
            let output = self.model.train_step(
                &batch.features,
                &batch.labels,
                batch.valid_rows,
                learning_rate,
            )?;

            let metrics = Metrics::new(f64::from(output.loss), step)
                .with_accuracy(f64::from(output.accuracy))
                .with_learning_rate(f64::from(learning_rate));
            recorder.record_weighted(&metrics, output.rows as f64);
            self.hooks.after_step(step, &metrics)?;
            steps += 1;
        }
        Ok((recorder, learning_rate, steps))
    }

    fn validate(&mut self, validation: &mut BatchStream) -> TrainingResult<MetricsRecorder> {
        let mut recorder = MetricsRecorder::new();
        for _ in 0..self.config.validation_steps {
            let Some(batch) = next_tensor_batch(validation, &self.tensorizer)? else {
                debug!("Validation stream exhausted");
                break;
            };
            let output = self
                .model
                .evaluate(&batch.features, &batch.labels, batch.valid_rows)?;
            let metrics = Metrics::new(f64::from(output.loss), self.model.global_step())
                .with_accuracy(f64::from(output.accuracy));
            recorder.record_weighted(&metrics, output.rows as f64);
        }
        Ok(recorder)
    }
}

/// Pulls and tensorizes the next batch. `None` once the stream is exhausted.
pub(crate) fn next_tensor_batch(
    stream: &mut BatchStream,
    tensorizer: &Tensorizer,
) -> TrainingResult<Option<TensorBatch>> {
    match stream.next_batch() {
        Ok(batch) => Ok(Some(tensorizer.tensorize(&batch)?)),
        Err(DataError::StreamExhausted) => Ok(None),
        Err(e) => Err(TrainingError::from(e)),
    }
}
