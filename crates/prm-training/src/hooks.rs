//! Training hooks for customizing the training loop.
//!
//! Hooks observe every optimizer step and every finished epoch. The default
//! set logs progress, keeps the checkpoint with the lowest validation loss
//! and stops training once validation loss has not improved for a while.

use std::path::{Path, PathBuf};

use prm_checkpoint::{CheckpointError, Checkpointer, JsonCheckpointer};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::model::SequenceModel;
use crate::trainer::EpochSummary;

/// Errors that can occur during hook execution.
#[derive(Debug, Error)]
pub enum HookError {
    /// A checkpoint error occurred.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A custom hook error.
    #[error("Hook error: {0}")]
    Custom(String),
}

/// Result type for hook operations.
pub type HookResult<T> = Result<T, HookError>;

/// Action to take after a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Continue training normally.
    Continue,
    /// Stop training after the current epoch.
    Stop,
}

/// Trait for training hooks.
///
/// # Examples
///
/// ```
/// use prm_training::hooks::{Hook, HookAction, HookResult};
/// use prm_training::metrics::Metrics;
///
/// struct PrintLoss;
///
/// impl Hook for PrintLoss {
///     fn name(&self) -> &str {
///         "print_loss"
///     }
///
///     fn after_step(&mut self, step: u64, metrics: &Metrics) -> HookResult<()> {
///         println!("Step {}: loss = {}", step, metrics.loss);
///         Ok(())
///     }
/// }
/// ```
pub trait Hook: Send {
    /// Returns the name of this hook for logging purposes.
    fn name(&self) -> &str;

    /// Called before the first step of each epoch (1-based).
    fn before_epoch(&mut self, _epoch: usize) -> HookResult<()> {
        Ok(())
    }

    /// Called after each optimizer step with that step's metrics.
    fn after_step(&mut self, _step: u64, _metrics: &Metrics) -> HookResult<()> {
        Ok(())
    }

    /// Called once validation for an epoch has finished.
    ///
    /// Hooks may annotate the summary, e.g. to record that a checkpoint was
    /// written.
    fn after_epoch(
        &mut self,
        _summary: &mut EpochSummary,
        _model: &dyn SequenceModel,
    ) -> HookResult<HookAction> {
        Ok(HookAction::Continue)
    }

    /// Called at the end of training.
    fn end(&mut self, _step: u64, _last: Option<&EpochSummary>) -> HookResult<()> {
        Ok(())
    }
}

/// A hook that logs training metrics at regular intervals.
///
/// # Examples
///
/// ```
/// use prm_training::hooks::LoggingHook;
///
/// // Log every 100 steps
/// let hook = LoggingHook::new(100);
/// ```
#[derive(Debug)]
pub struct LoggingHook {
    /// Log every N steps.
    every_n_steps: u64,
}

impl LoggingHook {
    /// Creates a new logging hook that logs every N steps.
    pub fn new(every_n_steps: u64) -> Self {
        Self {
            every_n_steps: every_n_steps.max(1),
        }
    }
}

impl Hook for LoggingHook {
    fn name(&self) -> &str {
        "logging_hook"
    }

    fn after_step(&mut self, step: u64, metrics: &Metrics) -> HookResult<()> {
        if step % self.every_n_steps == 0 {
            let mut msg = format!("Step {}: loss = {:.6}", step, metrics.loss);
            if let Some(acc) = metrics.accuracy {
                msg.push_str(&format!(", accuracy = {:.4}", acc));
            }
            if let Some(lr) = metrics.learning_rate {
                msg.push_str(&format!(", lr = {:.3e}", lr));
            }
            info!("{}", msg);
        }
        Ok(())
    }

    fn after_epoch(
        &mut self,
        summary: &mut EpochSummary,
        _model: &dyn SequenceModel,
    ) -> HookResult<HookAction> {
        let mut msg = format!(
            "Epoch {}: loss = {:.6}, accuracy = {:.4}",
            summary.epoch, summary.train_loss, summary.train_accuracy
        );
        if let (Some(loss), Some(acc)) = (summary.val_loss, summary.val_accuracy) {
            msg.push_str(&format!(", val_loss = {:.6}, val_accuracy = {:.4}", loss, acc));
        }
        info!("{}", msg);
        Ok(HookAction::Continue)
    }

    fn end(&mut self, step: u64, last: Option<&EpochSummary>) -> HookResult<()> {
        match last.and_then(|s| s.val_loss) {
            Some(val_loss) => info!(
                "Training finished at step {}: final val_loss = {:.6}",
                step, val_loss
            ),
            None => info!("Training finished at step {}", step),
        }
        Ok(())
    }
}

/// Writes the model to a single path whenever validation loss reaches a
/// new minimum.
///
/// Epochs without validation loss never write. The first epoch with one
/// always does, since the best value starts at infinity.
pub struct BestCheckpointHook {
    path: PathBuf,
    checkpointer: Box<dyn Checkpointer>,
    best: f64,
}

impl std::fmt::Debug for BestCheckpointHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BestCheckpointHook")
            .field("path", &self.path)
            .field("best", &self.best)
            .finish()
    }
}

impl BestCheckpointHook {
    /// Creates a hook that writes JSON checkpoints to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_checkpointer(path, Box::new(JsonCheckpointer::new()))
    }

    /// Creates a hook with a custom checkpointer.
    pub fn with_checkpointer(path: impl Into<PathBuf>, checkpointer: Box<dyn Checkpointer>) -> Self {
        Self {
            path: path.into(),
            checkpointer,
            best: f64::INFINITY,
        }
    }

    /// Target path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowest validation loss seen so far.
    pub fn best(&self) -> f64 {
        self.best
    }
}

impl Hook for BestCheckpointHook {
    fn name(&self) -> &str {
        "best_checkpoint_hook"
    }

    fn after_epoch(
        &mut self,
        summary: &mut EpochSummary,
        model: &dyn SequenceModel,
    ) -> HookResult<HookAction> {
        let Some(val_loss) = summary.val_loss else {
            debug!(epoch = summary.epoch, "No validation loss, skipping checkpoint");
            return Ok(HookAction::Continue);
        };

        if val_loss < self.best {
            info!(
                "val_loss improved from {:.6} to {:.6}, saving model to {}",
                self.best,
                val_loss,
                self.path.display()
            );
            let state = model.state().with_epoch(summary.epoch);
            self.checkpointer.save(&self.path, &state)?;
            self.best = val_loss;
            summary.checkpoint_saved = true;
        } else {
            info!("val_loss did not improve from {:.6}", self.best);
        }
        Ok(HookAction::Continue)
    }
}

/// Stops training when validation loss has not decreased for `patience`
/// consecutive epochs, counting the current one. With a patience of 0 the
/// first epoch without improvement stops training.
#[derive(Debug)]
pub struct EarlyStoppingHook {
    patience: usize,
    best: f64,
    best_epoch: usize,
    wait: usize,
}

impl EarlyStoppingHook {
    /// Creates a new early stopping hook.
    ///
    /// # Examples
    ///
    /// ```
    /// use prm_training::hooks::EarlyStoppingHook;
    ///
    /// let hook = EarlyStoppingHook::new(10);
    /// assert_eq!(hook.patience(), 10);
    /// ```
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            best_epoch: 0,
            wait: 0,
        }
    }

    /// Configured patience.
    pub fn patience(&self) -> usize {
        self.patience
    }

    /// Epochs since the last improvement.
    pub fn wait(&self) -> usize {
        self.wait
    }
}

impl Hook for EarlyStoppingHook {
    fn name(&self) -> &str {
        "early_stopping_hook"
    }

    fn after_epoch(
        &mut self,
        summary: &mut EpochSummary,
        _model: &dyn SequenceModel,
    ) -> HookResult<HookAction> {
        let Some(current) = summary.val_loss else {
            warn!("EarlyStoppingHook: val_loss not available at epoch {}", summary.epoch);
            return Ok(HookAction::Continue);
        };

        if current < self.best {
            self.best = current;
            self.best_epoch = summary.epoch;
            self.wait = 0;
            return Ok(HookAction::Continue);
        }

        self.wait += 1;
        debug!(
            "EarlyStoppingHook: no improvement for {} epochs (patience: {})",
            self.wait, self.patience
        );
        if self.wait >= self.patience {
            info!(
                "EarlyStoppingHook: stopping after epoch {} (best val_loss {:.6} at epoch {})",
                summary.epoch, self.best, self.best_epoch
            );
            return Ok(HookAction::Stop);
        }
        Ok(HookAction::Continue)
    }
}

/// A collection of hooks that are run together, in insertion order.
#[derive(Default)]
pub struct HookList {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookList {
    /// Creates a new empty hook list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook to the list.
    pub fn add<H: Hook + 'static>(&mut self, hook: H) {
        self.hooks.push(Box::new(hook));
    }

    /// Number of hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Names of the registered hooks.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Runs `before_epoch` on all hooks.
    pub fn before_epoch(&mut self, epoch: usize) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.before_epoch(epoch)?;
        }
        Ok(())
    }

    /// Runs `after_step` on all hooks.
    pub fn after_step(&mut self, step: u64, metrics: &Metrics) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.after_step(step, metrics)?;
        }
        Ok(())
    }

    /// Runs `after_epoch` on every hook.
    ///
    /// All hooks run even when an earlier one asks to stop; the result is
    /// `Stop` if any of them did.
    pub fn after_epoch(
        &mut self,
        summary: &mut EpochSummary,
        model: &dyn SequenceModel,
    ) -> HookResult<HookAction> {
        let mut action = HookAction::Continue;
        for hook in &mut self.hooks {
            if hook.after_epoch(summary, model)? == HookAction::Stop {
                action = HookAction::Stop;
            }
        }
        Ok(action)
    }

    /// Runs `end` on all hooks.
    pub fn end(&mut self, step: u64, last: Option<&EpochSummary>) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.end(step, last)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ConstantModel;
    use prm_checkpoint::ModelState;
    use tempfile::tempdir;

    fn summary(epoch: usize, val_loss: Option<f64>) -> EpochSummary {
        EpochSummary {
            epoch,
            global_step: epoch as u64 * 10,
            train_loss: 1.0,
            train_accuracy: 0.5,
            val_loss,
            val_accuracy: val_loss.map(|_| 0.5),
            learning_rate: 1e-3,
            checkpoint_saved: false,
        }
    }

    #[test]
    fn test_logging_hook() {
        let mut hook = LoggingHook::new(10);
        let model = ConstantModel::default();
        assert!(hook.after_step(10, &Metrics::new(0.5, 10)).is_ok());
        assert_eq!(
            hook.after_epoch(&mut summary(1, None), &model).unwrap(),
            HookAction::Continue
        );
        assert!(hook.end(10, None).is_ok());
    }

    #[test]
    fn test_best_checkpoint_only_on_improvement() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best.json");
        let mut hook = BestCheckpointHook::new(&path);
        let mut model = ConstantModel::default();

        let mut first = summary(1, Some(0.9));
        hook.after_epoch(&mut first, &model).unwrap();
        assert!(first.checkpoint_saved);
        assert_eq!(JsonCheckpointer::new().restore(&path).unwrap().epoch, 1);

        model.global_step = 99;
        let mut worse = summary(2, Some(0.95));
        hook.after_epoch(&mut worse, &model).unwrap();
        assert!(!worse.checkpoint_saved);
        assert_eq!(JsonCheckpointer::new().restore(&path).unwrap().epoch, 1);

        let mut better = summary(3, Some(0.5));
        hook.after_epoch(&mut better, &model).unwrap();
        assert!(better.checkpoint_saved);
        let restored: ModelState = JsonCheckpointer::new().restore(&path).unwrap();
        assert_eq!(restored.epoch, 3);
        assert_eq!(restored.global_step, 99);
        assert_eq!(hook.best(), 0.5);
    }

    #[test]
    fn test_best_checkpoint_equal_loss_does_not_save() {
        let dir = tempdir().unwrap();
        let mut hook = BestCheckpointHook::new(dir.path().join("best.json"));
        let model = ConstantModel::default();

        hook.after_epoch(&mut summary(1, Some(0.5)), &model).unwrap();
        let mut tie = summary(2, Some(0.5));
        hook.after_epoch(&mut tie, &model).unwrap();
        assert!(!tie.checkpoint_saved);
    }

    #[test]
    fn test_best_checkpoint_without_validation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best.json");
        let mut hook = BestCheckpointHook::new(&path);
        let mut s = summary(1, None);
        hook.after_epoch(&mut s, &ConstantModel::default()).unwrap();
        assert!(!s.checkpoint_saved);
        assert!(!path.exists());
    }

    #[test]
    fn test_early_stopping_patience() {
        let mut hook = EarlyStoppingHook::new(2);
        let model = ConstantModel::default();
        let mut run = |epoch, loss| hook.after_epoch(&mut summary(epoch, Some(loss)), &model).unwrap();

        assert_eq!(run(1, 1.0), HookAction::Continue);
        assert_eq!(run(2, 0.8), HookAction::Continue);
        assert_eq!(run(3, 0.8), HookAction::Continue);
        assert_eq!(run(4, 0.7), HookAction::Continue);
        assert_eq!(run(5, 0.9), HookAction::Continue);
        assert_eq!(run(6, 0.75), HookAction::Stop);
    }

    #[test]
    fn test_early_stopping_zero_patience() {
        let mut hook = EarlyStoppingHook::new(0);
        let model = ConstantModel::default();
        let mut run = |epoch, loss| hook.after_epoch(&mut summary(epoch, Some(loss)), &model).unwrap();

        assert_eq!(run(1, 1.0), HookAction::Continue);
        assert_eq!(run(2, 0.9), HookAction::Continue);
        assert_eq!(run(3, 0.9), HookAction::Stop);
    }

    #[derive(Default)]
    struct CountingHook {
        epochs: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Hook for CountingHook {
        fn name(&self) -> &str {
            "counting_hook"
        }

        fn after_epoch(
            &mut self,
            _summary: &mut EpochSummary,
            _model: &dyn SequenceModel,
        ) -> HookResult<HookAction> {
            self.epochs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(HookAction::Continue)
        }
    }

    #[test]
    fn test_hook_list_runs_every_hook() {
        let counter = CountingHook::default();
        let epochs = counter.epochs.clone();
        let mut hooks = HookList::new();
        hooks.add(EarlyStoppingHook::new(1));
        hooks.add(counter);
        assert_eq!(hooks.names(), vec!["early_stopping_hook", "counting_hook"]);

        let model = ConstantModel::default();
        let mut first = summary(1, Some(0.5));
        assert_eq!(hooks.after_epoch(&mut first, &model).unwrap(), HookAction::Continue);

        // Early stopping fires first, the next hook still runs.
        let mut second = summary(2, Some(0.6));
        assert_eq!(hooks.after_epoch(&mut second, &model).unwrap(), HookAction::Stop);
        assert_eq!(epochs.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(hooks.end(20, Some(&second)).is_ok());
    }
}
