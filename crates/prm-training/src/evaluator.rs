//! Inference over a test file and the re-ranked prediction output.
//!
//! For every real row with at least one relevant item the model's scores
//! define a new order of the candidate list. The evaluator writes the label
//! vector in its original order and in that new order, one row per line:
//!
//! ```text
//! [0.0, 1.0, 0.0]\t[1.0, 0.0, 0.0]
//! ```

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use prm_data::{BatchStream, Tensorizer};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{TrainingError, TrainingResult};
use crate::model::SequenceModel;
use crate::trainer::next_tensor_batch;

/// Indices of `scores` from highest to lowest.
///
/// The sort is stable, so tied scores keep their original order. NaN scores
/// go last.
pub fn argsort_desc(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        let (x, y) = (scores[a], scores[b]);
        match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        }
    });
    order
}

/// Reorders `labels` by descending `scores`.
///
/// # Examples
///
/// ```
/// use prm_training::evaluator::rerank;
///
/// assert_eq!(rerank(&[0.2, 0.9, 0.5], &[0.0, 1.0, 0.0]), vec![1.0, 0.0, 0.0]);
/// ```
pub fn rerank(scores: &[f32], labels: &[f32]) -> Vec<f32> {
    argsort_desc(scores).into_iter().map(|i| labels[i]).collect()
}

/// Single-line JSON with `", "` between array items: `[0.0, 1.0]`.
struct SpacedArrayFormatter;

impl serde_json::ser::Formatter for SpacedArrayFormatter {
    fn begin_array_value<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> std::io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }
}

fn encode_labels(values: &[f32]) -> Result<String, String> {
    let mut serializer = serde_json::Serializer::with_formatter(Vec::new(), SpacedArrayFormatter);
    values.serialize(&mut serializer).map_err(|e| e.to_string())?;
    String::from_utf8(serializer.into_inner()).map_err(|e| e.to_string())
}

/// One line of a prediction file.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedOutputRecord {
    /// Labels in the order they were read.
    pub original: Vec<f32>,
    /// Labels in model order.
    pub reranked: Vec<f32>,
}

impl RankedOutputRecord {
    /// Formats the record as `<original>\t<reranked>\n`.
    pub fn to_line(&self) -> TrainingResult<String> {
        let encode = |values: &[f32]| {
            encode_labels(values)
                .map_err(|message| TrainingError::MalformedPrediction { line: 0, message })
        };
        Ok(format!(
            "{}\t{}\n",
            encode(&self.original)?,
            encode(&self.reranked)?
        ))
    }

    /// Parses one line of a prediction file. `line_no` is 1-based and only
    /// used in error messages.
    pub fn parse(line: &str, line_no: usize) -> TrainingResult<Self> {
        let malformed = |message: String| TrainingError::MalformedPrediction {
            line: line_no,
            message,
        };
        let line = line.trim_end_matches(['\n', '\r']);
        let (original, reranked) = line
            .split_once('\t')
            .ok_or_else(|| malformed("expected two tab-separated fields".to_string()))?;
        let original: Vec<f32> =
            serde_json::from_str(original).map_err(|e| malformed(format!("original: {}", e)))?;
        let reranked: Vec<f32> =
            serde_json::from_str(reranked).map_err(|e| malformed(format!("reranked: {}", e)))?;
        if original.len() != reranked.len() {
            return Err(malformed(format!(
                "original has {} labels, reranked has {}",
                original.len(),
                reranked.len()
            )));
        }
        Ok(Self { original, reranked })
    }
}

/// Counters of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    /// Batches read.
    pub batches: u64,
    /// Real rows scored.
    pub rows_seen: u64,
    /// Rows written to the output file.
    pub rows_written: u64,
    /// Rows without any relevant item.
    pub rows_skipped: u64,
}

/// Scores a test stream and writes the re-ranked label vectors.
pub struct RankingEvaluator<'a, M: SequenceModel> {
    model: &'a M,
    tensorizer: Tensorizer,
}

impl<'a, M: SequenceModel> RankingEvaluator<'a, M> {
    /// Creates an evaluator for `model`.
    ///
    /// # Errors
    ///
    /// Fails if the tensorizer was built for another mode or list length.
    pub fn new(model: &'a M, tensorizer: Tensorizer) -> TrainingResult<Self> {
        if tensorizer.model_type() != model.model_type() {
            return Err(TrainingError::ModeMismatch {
                expected: model.model_type(),
                actual: tensorizer.model_type(),
            });
        }
        if tensorizer.seq_len() != model.seq_len() {
            return Err(TrainingError::SeqLenMismatch {
                expected: model.seq_len(),
                actual: tensorizer.seq_len(),
            });
        }
        Ok(Self { model, tensorizer })
    }

    /// Reads `stream` to its end and writes one line per relevant row to
    /// `output`.
    ///
    /// The file is flushed before returning, also when a batch fails.
    pub fn run(&self, stream: &mut BatchStream, output: &Path) -> TrainingResult<EvaluationReport> {
        let io_error = |source| TrainingError::Io {
            path: output.to_path_buf(),
            source,
        };
        info!(output = %output.display(), "Writing predictions");

        let mut writer = BufWriter::new(File::create(output).map_err(io_error)?);
        let mut report = EvaluationReport::default();
        let result = self.write_all(stream, &mut writer, output, &mut report);
        let flushed = writer.flush().map_err(io_error);
        result?;
        flushed?;

        info!(
            batches = report.batches,
            rows_seen = report.rows_seen,
            rows_written = report.rows_written,
            rows_skipped = report.rows_skipped,
            "Evaluation complete"
        );
        Ok(report)
    }

    /// Like [`RankingEvaluator::run`], writing next to `test_set` as
    /// `<test_set>.predict.out`.
    pub fn run_for_test_set(
        &self,
        stream: &mut BatchStream,
        test_set: &Path,
    ) -> TrainingResult<(PathBuf, EvaluationReport)> {
        let output = prm_core::prediction_output_path(test_set);
        let report = self.run(stream, &output)?;
        Ok((output, report))
    }

    fn write_all<W: Write>(
        &self,
        stream: &mut BatchStream,
        writer: &mut W,
        output: &Path,
        report: &mut EvaluationReport,
    ) -> TrainingResult<()> {
        while let Some(batch) = next_tensor_batch(stream, &self.tensorizer)? {
            report.batches += 1;
            let scores = self.model.score(&batch.features)?;

            for row in 0..batch.valid_rows {
                report.rows_seen += 1;
                if !batch.labels.has_relevant(row) {
                    report.rows_skipped += 1;
                    continue;
                }
                let labels = batch.labels.row(row).to_vec();
                let row_scores = scores.row(row).to_vec();
                let record = RankedOutputRecord {
                    reranked: rerank(&row_scores, &labels),
                    original: labels,
                };
                writer
                    .write_all(record.to_line()?.as_bytes())
                    .map_err(|source| TrainingError::Io {
                        path: output.to_path_buf(),
                        source,
                    })?;
                report.rows_written += 1;
            }
            debug!(batch = report.batches, rows = batch.valid_rows, "Scored batch");
        }
        Ok(())
    }
}
