//! Training metrics collection and recording.

use serde::{Deserialize, Serialize};

/// Metrics of one training step or one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Mean list-wise cross-entropy.
    pub loss: f64,
    /// Fraction of lists whose top-scored item is the top-labeled item.
    pub accuracy: Option<f64>,
    /// Learning rate the step was taken with.
    pub learning_rate: Option<f64>,
    /// The global step at which these metrics were recorded.
    pub global_step: u64,
}

impl Metrics {
    /// Creates a new `Metrics` instance with the given loss and step.
    ///
    /// # Examples
    ///
    /// ```
    /// use prm_training::metrics::Metrics;
    ///
    /// let metrics = Metrics::new(0.5, 100).with_accuracy(0.25);
    /// assert_eq!(metrics.loss, 0.5);
    /// assert_eq!(metrics.accuracy, Some(0.25));
    /// ```
    pub fn new(loss: f64, global_step: u64) -> Self {
        Self {
            loss,
            accuracy: None,
            learning_rate: None,
            global_step,
        }
    }

    /// Sets the accuracy metric.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Sets the learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }
}

/// Running averages over many steps.
///
/// Each recorded entry is weighted by the number of real rows it covered,
/// so a short final batch does not count as much as a full one.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    loss_sum: f64,
    accuracy_sum: f64,
    accuracy_weight: f64,
    weight: f64,
    count: u64,
}

impl MetricsRecorder {
    /// Creates a new empty `MetricsRecorder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a set of metrics with weight 1.
    pub fn record(&mut self, metrics: &Metrics) {
        self.record_weighted(metrics, 1.0);
    }

    /// Records a set of metrics covering `weight` rows.
    pub fn record_weighted(&mut self, metrics: &Metrics, weight: f64) {
        self.count += 1;
        if weight <= 0.0 {
            return;
        }
        self.loss_sum += metrics.loss * weight;
        self.weight += weight;
        if let Some(acc) = metrics.accuracy {
            self.accuracy_sum += acc * weight;
            self.accuracy_weight += weight;
        }
    }

    /// Returns the number of entries recorded.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the average loss, or `None` if nothing with weight was recorded.
    pub fn average_loss(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.loss_sum / self.weight)
    }

    /// Returns the average accuracy, if any accuracy values were recorded.
    pub fn average_accuracy(&self) -> Option<f64> {
        (self.accuracy_weight > 0.0).then(|| self.accuracy_sum / self.accuracy_weight)
    }

    /// Aggregates everything recorded so far. The loss is 0 if nothing was recorded.
    pub fn aggregate(&self, global_step: u64) -> Metrics {
        let mut metrics = Metrics::new(self.average_loss().unwrap_or(0.0), global_step);
        metrics.accuracy = self.average_accuracy();
        metrics
    }

    /// Resets the recorder to its initial state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_unweighted() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(&Metrics::new(0.5, 1).with_accuracy(0.8));
        recorder.record(&Metrics::new(0.3, 2).with_accuracy(0.9));

        let avg = recorder.aggregate(2);
        assert!((avg.loss - 0.4).abs() < 1e-10);
        assert!((avg.accuracy.unwrap() - 0.85).abs() < 1e-10);
        assert_eq!(avg.global_step, 2);
    }

    #[test]
    fn test_weighted_average() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_weighted(&Metrics::new(1.0, 1), 3.0);
        recorder.record_weighted(&Metrics::new(2.0, 2), 1.0);
        assert!((recorder.average_loss().unwrap() - 1.25).abs() < 1e-10);
        assert_eq!(recorder.average_accuracy(), None);
    }

    #[test]
    fn test_zero_weight_counts_but_does_not_average() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_weighted(&Metrics::new(5.0, 1), 0.0);
        assert_eq!(recorder.count(), 1);
        assert_eq!(recorder.average_loss(), None);
    }

    #[test]
    fn test_reset() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(&Metrics::new(0.5, 1));
        recorder.reset();
        assert_eq!(recorder.count(), 0);
        assert_eq!(recorder.average_loss(), None);
    }
}
