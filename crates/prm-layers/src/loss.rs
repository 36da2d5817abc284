//! List-wise softmax and categorical cross-entropy.
//!
//! Both operate on `[batch, list]` score matrices where each row is one
//! candidate list. Only the first `valid_rows` rows take part in the loss;
//! the remainder are padding and receive a zero gradient.

use crate::attention::softmax_in_place;
use crate::error::LayerError;
use crate::tensor::Tensor;

/// Loss value and gradient with respect to the logits.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Mean cross-entropy over the real rows.
    pub loss: f32,
    /// `dL/dz`, same shape as the logits.
    pub grad: Tensor,
}

/// Row-wise softmax of a `[batch, list]` matrix.
pub fn list_softmax(logits: &Tensor) -> Result<Tensor, LayerError> {
    check_2d(logits)?;
    let mut out = logits.clone();
    let list = out.last_dim();
    if list > 0 {
        for row in out.data_mut().chunks_mut(list) {
            softmax_in_place(row);
        }
    }
    Ok(out)
}

/// `-Σ y · log softmax(z)` averaged over the first `valid_rows` rows.
///
/// Labels are used as-is (they need not sum to one), so a row of all-zero
/// labels contributes nothing to the loss or the gradient.
pub fn softmax_cross_entropy(
    logits: &Tensor,
    labels: &Tensor,
    valid_rows: usize,
) -> Result<LossOutput, LayerError> {
    check_2d(logits)?;
    if logits.shape() != labels.shape() {
        return Err(LayerError::ShapeMismatch {
            expected: logits.shape().to_vec(),
            actual: labels.shape().to_vec(),
        });
    }

    let (rows, list) = (logits.shape()[0], logits.shape()[1]);
    let valid_rows = valid_rows.min(rows);
    let mut grad = Tensor::zeros(logits.shape());
    if valid_rows == 0 || list == 0 {
        return Ok(LossOutput { loss: 0.0, grad });
    }

    let norm = 1.0 / valid_rows as f32;
    let mut total = 0.0f64;
    let rows_iter = logits
        .data()
        .chunks(list)
        .zip(labels.data().chunks(list))
        .zip(grad.data_mut().chunks_mut(list))
        .take(valid_rows);
    for ((z, y), g) in rows_iter {
        let max = z.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let log_norm = max + z.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
        let label_mass: f32 = y.iter().sum();

        for ((gi, &zi), &yi) in g.iter_mut().zip(z).zip(y) {
            let log_p = zi - log_norm;
            total -= (yi * log_p) as f64;
            *gi = (log_p.exp() * label_mass - yi) * norm;
        }
    }

    Ok(LossOutput {
        loss: (total / valid_rows as f64) as f32,
        grad,
    })
}

fn check_2d(tensor: &Tensor) -> Result<(), LayerError> {
    if tensor.ndim() != 2 {
        return Err(LayerError::ForwardError {
            message: format!("expected [batch, list] scores, got {:?}", tensor.shape()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_close;

    #[test]
    fn test_list_softmax_rows_sum_to_one() {
        let logits = Tensor::from_data(&[2, 3], vec![1.0, 2.0, 3.0, -1.0, 0.0, 50.0]);
        let probs = list_softmax(&logits).unwrap();
        for row in probs.data().chunks(3) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        assert!(probs.data()[2] > probs.data()[1]);
    }

    #[test]
    fn test_uniform_logits_loss() {
        let logits = Tensor::zeros(&[1, 4]);
        let labels = Tensor::from_data(&[1, 4], vec![0.0, 1.0, 0.0, 0.0]);
        let out = softmax_cross_entropy(&logits, &labels, 1).unwrap();
        assert!((out.loss - 4.0f32.ln()).abs() < 1e-5);
        assert_close(out.grad.data(), &[0.25, -0.75, 0.25, 0.25], 1e-5);
    }

    #[test]
    fn test_padding_and_zero_label_rows_are_inert() {
        let logits = Tensor::from_data(&[3, 2], vec![0.0, 0.0, 1.0, 2.0, 5.0, -5.0]);
        let labels = Tensor::from_data(&[3, 2], vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let out = softmax_cross_entropy(&logits, &labels, 2).unwrap();

        assert!((out.loss - 2.0f32.ln() / 2.0).abs() < 1e-5);
        assert_eq!(&out.grad.data()[2..6], &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let logits = Tensor::from_data(&[2, 3], vec![0.3, -0.2, 0.8, 1.0, 0.1, -0.4]);
        let labels = Tensor::from_data(&[2, 3], vec![0.0, 1.0, 2.0, 1.0, 0.0, 0.0]);
        let out = softmax_cross_entropy(&logits, &labels, 2).unwrap();

        let eps = 1e-2;
        let numeric: Vec<f32> = (0..logits.numel())
            .map(|i| {
                let mut plus = logits.clone();
                plus.data_mut()[i] += eps;
                let mut minus = logits.clone();
                minus.data_mut()[i] -= eps;
                let lp = softmax_cross_entropy(&plus, &labels, 2).unwrap().loss;
                let lm = softmax_cross_entropy(&minus, &labels, 2).unwrap().loss;
                (lp - lm) / (2.0 * eps)
            })
            .collect();
        assert_close(out.grad.data(), &numeric, 1e-2);
    }

    #[test]
    fn test_rejects_mismatched_labels() {
        let err = softmax_cross_entropy(&Tensor::zeros(&[2, 3]), &Tensor::zeros(&[2, 4]), 2);
        assert!(matches!(err, Err(LayerError::ShapeMismatch { .. })));
    }
}
