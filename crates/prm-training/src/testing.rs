//! Fixtures shared by the unit tests of this crate.

use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use prm_checkpoint::ModelState;
use prm_core::ModelType;
use prm_data::{FeatureBundle, LabelMatrix};

use crate::error::TrainingResult;
use crate::model::{PredictionMatrix, SequenceModel, StepOutput};

/// A model without weights. Its loss is the number of real rows, which
/// makes row weighting visible in aggregated metrics.
#[derive(Debug, Default)]
pub(crate) struct ConstantModel {
    pub global_step: u64,
    pub learning_rates: Vec<f32>,
}

impl SequenceModel for ConstantModel {
    fn model_type(&self) -> ModelType {
        ModelType::ContextOnly
    }

    fn seq_len(&self) -> usize {
        3
    }

    fn global_step(&self) -> u64 {
        self.global_step
    }

    fn score(&self, features: &FeatureBundle) -> TrainingResult<PredictionMatrix> {
        let shape = (features.batch_size(), features.seq_len());
        Ok(PredictionMatrix::new(Array2::from_elem(shape, 1.0 / 3.0)))
    }

    fn train_step(
        &mut self,
        _features: &FeatureBundle,
        _labels: &LabelMatrix,
        valid_rows: usize,
        learning_rate: f32,
    ) -> TrainingResult<StepOutput> {
        self.global_step += 1;
        self.learning_rates.push(learning_rate);
        Ok(StepOutput {
            loss: valid_rows as f32,
            accuracy: 0.0,
            rows: valid_rows,
        })
    }

    fn evaluate(
        &self,
        _features: &FeatureBundle,
        _labels: &LabelMatrix,
        valid_rows: usize,
    ) -> TrainingResult<StepOutput> {
        Ok(StepOutput {
            loss: valid_rows as f32,
            accuracy: 0.0,
            rows: valid_rows,
        })
    }

    fn state(&self) -> ModelState {
        ModelState::new(self.global_step)
    }

    fn load_state(&mut self, state: &ModelState) -> TrainingResult<()> {
        self.global_step = state.global_step;
        Ok(())
    }
}

fn json_list<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    let items: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(","))
}

/// One record in the production layout (3 ucf, 5 icf, 7 iv, 12 pv fields).
///
/// Row `r` is relevant at position `r % seq_len`, except that every fourth
/// row has no relevant item.
pub(crate) fn record_line(row: usize, seq_len: usize) -> String {
    let per_position = |width: usize, salt: usize| {
        json_list((0..seq_len).map(|p| {
            json_list((0..width).map(|f| ((row * 7 + p * 3 + f + salt) % 10) as f32 / 10.0))
        }))
    };
    let labels = (0..seq_len).map(|p| {
        if row % 4 != 3 && p == row % seq_len {
            1
        } else {
            0
        }
    });
    format!(
        "{}|{}|{}|{}|{}|{}\n",
        row + 100,
        json_list((0..3).map(|f| row + f)),
        json_list((0..seq_len).map(|p| json_list((0..5).map(|f| (row + p + f) % 6)))),
        per_position(7, 1),
        per_position(12, 2),
        json_list(labels),
    )
}

/// Writes `rows` records to `dir/name` and returns the path.
pub(crate) fn write_dataset(dir: &Path, name: &str, rows: usize, seq_len: usize) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for row in 0..rows {
        file.write_all(record_line(row, seq_len).as_bytes()).unwrap();
    }
    file.flush().unwrap();
    path
}
