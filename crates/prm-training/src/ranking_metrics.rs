//! Offline ranking quality of a prediction file.
//!
//! Each line of a prediction file holds a label vector in its original order
//! and in model order. Computing the same metrics over both columns shows
//! how much the re-ranking changed the quality of the list.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::{TrainingError, TrainingResult};
use crate::evaluator::RankedOutputRecord;

/// Cutoffs used when none are given.
pub const DEFAULT_CUTOFFS: [usize; 2] = [5, 10];

fn is_relevant(label: f32) -> bool {
    label > 0.0
}

/// Average precision of one ranked label list. Any positive label counts
/// as relevant. A list without relevant items scores 0.
pub fn average_precision(labels: &[f32]) -> f64 {
    let mut hits = 0usize;
    let mut sum = 0.0;
    for (rank, &label) in labels.iter().enumerate() {
        if is_relevant(label) {
            hits += 1;
            sum += hits as f64 / (rank + 1) as f64;
        }
    }
    if hits == 0 {
        0.0
    } else {
        sum / hits as f64
    }
}

fn dcg(labels: impl Iterator<Item = f32>, k: usize) -> f64 {
    labels
        .take(k)
        .enumerate()
        .map(|(i, l)| (2f64.powf(f64::from(l)) - 1.0) / ((i + 2) as f64).log2())
        .sum()
}

/// NDCG@k with gain `2^label - 1` and a `log2(rank + 1)` discount.
///
/// Returns 0 when the ideal ordering has no gain.
///
/// # Examples
///
/// ```
/// use prm_training::ranking_metrics::ndcg_at_k;
///
/// assert_eq!(ndcg_at_k(&[1.0, 0.0, 0.0], 3), 1.0);
/// assert!(ndcg_at_k(&[0.0, 1.0, 0.0], 3) < 1.0);
/// ```
pub fn ndcg_at_k(labels: &[f32], k: usize) -> f64 {
    let mut ideal = labels.to_vec();
    ideal.sort_by(|a, b| b.total_cmp(a));
    let ideal = dcg(ideal.into_iter(), k);
    if ideal <= 0.0 {
        return 0.0;
    }
    dcg(labels.iter().copied(), k) / ideal
}

/// Fraction of the first `k` positions holding a relevant item. Lists
/// shorter than `k` are treated as padded with irrelevant items.
pub fn precision_at_k(labels: &[f32], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let hits = labels.iter().take(k).filter(|&&l| is_relevant(l)).count();
    hits as f64 / k as f64
}

/// Metric means over every list of one ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingSummary {
    /// Mean average precision.
    pub map: f64,
    /// NDCG keyed by cutoff.
    pub ndcg: BTreeMap<usize, f64>,
    /// Precision keyed by cutoff.
    pub precision: BTreeMap<usize, f64>,
}

/// Metrics of the original and the re-ranked orderings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingReport {
    /// Number of lists evaluated.
    pub lists: usize,
    /// Metrics of the order the lists were read in.
    pub original: RankingSummary,
    /// Metrics of the model order.
    pub reranked: RankingSummary,
}

#[derive(Default)]
struct SummaryAccumulator {
    map: f64,
    ndcg: BTreeMap<usize, f64>,
    precision: BTreeMap<usize, f64>,
}

impl SummaryAccumulator {
    fn add(&mut self, labels: &[f32], cutoffs: &[usize]) {
        self.map += average_precision(labels);
        for &k in cutoffs {
            *self.ndcg.entry(k).or_default() += ndcg_at_k(labels, k);
            *self.precision.entry(k).or_default() += precision_at_k(labels, k);
        }
    }

    fn finish(self, lists: usize) -> RankingSummary {
        let n = lists.max(1) as f64;
        RankingSummary {
            map: self.map / n,
            ndcg: self.ndcg.into_iter().map(|(k, v)| (k, v / n)).collect(),
            precision: self.precision.into_iter().map(|(k, v)| (k, v / n)).collect(),
        }
    }
}

/// Computes a [`RankingReport`] over in-memory records.
pub fn ranking_report(records: &[RankedOutputRecord], cutoffs: &[usize]) -> RankingReport {
    let mut original = SummaryAccumulator::default();
    let mut reranked = SummaryAccumulator::default();
    for record in records {
        original.add(&record.original, cutoffs);
        reranked.add(&record.reranked, cutoffs);
    }
    RankingReport {
        lists: records.len(),
        original: original.finish(records.len()),
        reranked: reranked.finish(records.len()),
    }
}

/// Reads a prediction file and computes its [`RankingReport`].
///
/// Empty lines are ignored. An empty `cutoffs` slice means
/// [`DEFAULT_CUTOFFS`].
///
/// # Errors
///
/// Returns [`TrainingError::Io`] if the file cannot be read and
/// [`TrainingError::MalformedPrediction`] for the first bad line.
pub fn evaluate_predictions(path: &Path, cutoffs: &[usize]) -> TrainingResult<RankingReport> {
    let io_error = |source| TrainingError::Io {
        path: path.to_path_buf(),
        source,
    };
    let cutoffs = if cutoffs.is_empty() {
        &DEFAULT_CUTOFFS[..]
    } else {
        cutoffs
    };

    let reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error)?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(RankedOutputRecord::parse(&line, i + 1)?);
    }

    let report = ranking_report(&records, cutoffs);
    info!(
        path = %path.display(),
        lists = report.lists,
        original_map = report.original.map,
        reranked_map = report.reranked.map,
        "Computed ranking metrics"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_average_precision() {
        assert!(close(average_precision(&[1.0, 0.0, 1.0]), (1.0 + 2.0 / 3.0) / 2.0));
        assert!(close(average_precision(&[0.0, 1.0]), 0.5));
        assert_eq!(average_precision(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_ndcg_hand_computed() {
        // DCG = 1/log2(3) = 0.6309, IDCG = 1.
        assert!(close(ndcg_at_k(&[0.0, 1.0, 0.0], 3), 1.0 / 3f64.log2()));
        // Cut off before the relevant item.
        assert_eq!(ndcg_at_k(&[0.0, 1.0, 0.0], 1), 0.0);
        assert_eq!(ndcg_at_k(&[0.0, 0.0], 2), 0.0);
    }

    #[test]
    fn test_ndcg_graded_gain() {
        // Gains 1 and 3; ideal order puts the 2-label first.
        let dcg = 1.0 + 3.0 / 3f64.log2();
        let idcg = 3.0 + 1.0 / 3f64.log2();
        assert!(close(ndcg_at_k(&[1.0, 2.0], 2), dcg / idcg));
    }

    #[test]
    fn test_precision_at_k() {
        assert!(close(precision_at_k(&[1.0, 0.0, 1.0, 0.0], 2), 0.5));
        assert!(close(precision_at_k(&[1.0, 1.0], 5), 0.4));
        assert_eq!(precision_at_k(&[1.0], 0), 0.0);
    }

    #[test]
    fn test_report_compares_orderings() {
        let records = vec![
            RankedOutputRecord {
                original: vec![0.0, 0.0, 1.0],
                reranked: vec![1.0, 0.0, 0.0],
            },
            RankedOutputRecord {
                original: vec![1.0, 0.0, 0.0],
                reranked: vec![1.0, 0.0, 0.0],
            },
        ];
        let report = ranking_report(&records, &[1]);
        assert_eq!(report.lists, 2);
        assert!(close(report.original.map, (1.0 / 3.0 + 1.0) / 2.0));
        assert!(close(report.reranked.map, 1.0));
        assert!(close(report.original.precision[&1], 0.5));
        assert!(close(report.reranked.ndcg[&1], 1.0));
    }

    #[test]
    fn test_evaluate_predictions_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt.predict.out");
        std::fs::write(
            &path,
            "[0.0,1.0,0.0]\t[1.0,0.0,0.0]\n\n[1.0, 0.0, 0.0]\t[1.0, 0.0, 0.0]\n",
        )
        .unwrap();

        let report = evaluate_predictions(&path, &[]).unwrap();
        assert_eq!(report.lists, 2);
        assert_eq!(report.reranked.ndcg.keys().copied().collect::<Vec<_>>(), vec![5, 10]);
        assert!(close(report.reranked.map, 1.0));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["original"]["ndcg"]["5"].is_number());
    }

    #[test]
    fn test_bad_line_reports_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.out");
        std::fs::write(&path, "[1.0]\t[1.0]\n[1.0] [1.0]\n").unwrap();
        match evaluate_predictions(&path, &[5]) {
            Err(TrainingError::MalformedPrediction { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            evaluate_predictions(&dir.path().join("nope"), &[5]),
            Err(TrainingError::Io { .. })
        ));
    }
}
