//! Multi-head scaled dot-product self-attention over a candidate list.
//!
//! For input `x` of shape `[batch, seq_len, d_model]`:
//!
//! ```text
//! Q = x Wq, K = x Wk, V = x Wv           (per head: d_k, d_k, d_v wide)
//! A_h = softmax(Q_h K_h^T / sqrt(d_k))   (over the key axis)
//! y = concat_h(A_h V_h) Wo
//! ```
//!
//! Every position attends to every other position; there is no mask.

use rand::Rng;
use rayon::prelude::*;

use crate::dense::Dense;
use crate::error::LayerError;
use crate::layer::{check_last_dim, scoped, Layer};
use crate::tensor::Tensor;

struct AttentionCache {
    batch: usize,
    seq_len: usize,
    q: Tensor,
    k: Tensor,
    v: Tensor,
    /// `[batch, n_head, seq_len, seq_len]`
    probs: Vec<f32>,
}

/// Multi-head self-attention with an output projection.
pub struct MultiHeadSelfAttention {
    n_head: usize,
    d_k: usize,
    d_v: usize,
    d_model: usize,
    query: Dense,
    key: Dense,
    value: Dense,
    output: Dense,
    cache: Option<AttentionCache>,
}

impl MultiHeadSelfAttention {
    /// Creates the four projections.
    ///
    /// # Arguments
    ///
    /// * `d_model` - Input and output width
    /// * `n_head` - Number of heads
    /// * `d_k` - Query/key width per head
    /// * `d_v` - Value width per head
    pub fn new<R: Rng + ?Sized>(
        d_model: usize,
        n_head: usize,
        d_k: usize,
        d_v: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            n_head,
            d_k,
            d_v,
            d_model,
            query: Dense::new_no_bias(d_model, n_head * d_k, rng),
            key: Dense::new_no_bias(d_model, n_head * d_k, rng),
            value: Dense::new_no_bias(d_model, n_head * d_v, rng),
            output: Dense::new(n_head * d_v, d_model, rng),
            cache: None,
        }
    }

    fn dims(&self, input: &Tensor) -> Result<(usize, usize), LayerError> {
        if input.ndim() != 3 {
            return Err(LayerError::ForwardError {
                message: format!(
                    "attention expects [batch, seq_len, d_model], got {:?}",
                    input.shape()
                ),
            });
        }
        check_last_dim(input, self.d_model)?;
        Ok((input.shape()[0], input.shape()[1]))
    }

    /// Returns `(context [batch, seq_len, n_head * d_v], probs)`.
    fn attend(&self, q: &Tensor, k: &Tensor, v: &Tensor, seq_len: usize) -> (Tensor, Vec<f32>) {
        let (h_n, d_k, d_v) = (self.n_head, self.d_k, self.d_v);
        let batch = q.shape()[0];
        let scale = 1.0 / (d_k as f32).sqrt();
        let qk_width = h_n * d_k;
        let v_width = h_n * d_v;

        let mut context = vec![0.0; batch * seq_len * v_width];
        let mut probs = vec![0.0; batch * h_n * seq_len * seq_len];
        if seq_len == 0 || v_width == 0 {
            return (Tensor::from_data(&[batch, seq_len, v_width], context), probs);
        }

        context
            .par_chunks_mut(seq_len * v_width)
            .zip(probs.par_chunks_mut(h_n * seq_len * seq_len))
            .enumerate()
            .for_each(|(b, (ctx_b, probs_b))| {
                let q_b = &q.data()[b * seq_len * qk_width..(b + 1) * seq_len * qk_width];
                let k_b = &k.data()[b * seq_len * qk_width..(b + 1) * seq_len * qk_width];
                let v_b = &v.data()[b * seq_len * v_width..(b + 1) * seq_len * v_width];

                for h in 0..h_n {
                    for i in 0..seq_len {
                        let q_i = &q_b[i * qk_width + h * d_k..i * qk_width + (h + 1) * d_k];
                        let row = &mut probs_b[(h * seq_len + i) * seq_len..(h * seq_len + i + 1) * seq_len];

                        for (j, p) in row.iter_mut().enumerate() {
                            let k_j = &k_b[j * qk_width + h * d_k..j * qk_width + (h + 1) * d_k];
                            *p = q_i.iter().zip(k_j).map(|(a, b)| a * b).sum::<f32>() * scale;
                        }
                        softmax_in_place(row);

                        let out = &mut ctx_b[i * v_width + h * d_v..i * v_width + (h + 1) * d_v];
                        for (j, &p) in row.iter().enumerate() {
                            let v_j = &v_b[j * v_width + h * d_v..j * v_width + (h + 1) * d_v];
                            for (o, &x) in out.iter_mut().zip(v_j) {
                                *o += p * x;
                            }
                        }
                    }
                }
            });

        (Tensor::from_data(&[batch, seq_len, v_width], context), probs)
    }

    fn sublayers(&self) -> [(&'static str, &Dense); 4] {
        [
            ("query", &self.query),
            ("key", &self.key),
            ("value", &self.value),
            ("output", &self.output),
        ]
    }
}

/// Numerically stable softmax of one row.
pub(crate) fn softmax_in_place(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for x in row.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    if sum > 0.0 {
        for x in row.iter_mut() {
            *x /= sum;
        }
    }
}

impl Layer for MultiHeadSelfAttention {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let (_, seq_len) = self.dims(input)?;
        let q = self.query.forward(input)?;
        let k = self.key.forward(input)?;
        let v = self.value.forward(input)?;
        let (context, _) = self.attend(&q, &k, &v, seq_len);
        self.output.forward(&context)
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let (batch, seq_len) = self.dims(input)?;
        let q = self.query.forward_train(input)?;
        let k = self.key.forward_train(input)?;
        let v = self.value.forward_train(input)?;
        let (context, probs) = self.attend(&q, &k, &v, seq_len);
        let out = self.output.forward_train(&context)?;
        self.cache = Some(AttentionCache {
            batch,
            seq_len,
            q,
            k,
            v,
            probs,
        });
        Ok(out)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let d_context = self.output.backward(grad)?;
        let cache = self.cache.as_ref().ok_or(LayerError::NotInitialized)?;
        let (batch, seq_len) = (cache.batch, cache.seq_len);
        let (h_n, d_k, d_v) = (self.n_head, self.d_k, self.d_v);
        let scale = 1.0 / (d_k as f32).sqrt();
        let qk_width = h_n * d_k;
        let v_width = h_n * d_v;

        let mut dq = vec![0.0; batch * seq_len * qk_width];
        let mut dk = vec![0.0; batch * seq_len * qk_width];
        let mut dv = vec![0.0; batch * seq_len * v_width];

        if seq_len > 0 && qk_width > 0 && v_width > 0 {
            dq.par_chunks_mut(seq_len * qk_width)
                .zip(dk.par_chunks_mut(seq_len * qk_width))
                .zip(dv.par_chunks_mut(seq_len * v_width))
                .enumerate()
                .for_each(|(b, ((dq_b, dk_b), dv_b))| {
                    let q_b = &cache.q.data()[b * seq_len * qk_width..(b + 1) * seq_len * qk_width];
                    let k_b = &cache.k.data()[b * seq_len * qk_width..(b + 1) * seq_len * qk_width];
                    let v_b = &cache.v.data()[b * seq_len * v_width..(b + 1) * seq_len * v_width];
                    let dc_b = &d_context.data()[b * seq_len * v_width..(b + 1) * seq_len * v_width];
                    let p_b = &cache.probs[b * h_n * seq_len * seq_len..(b + 1) * h_n * seq_len * seq_len];
                    let mut d_scores = vec![0.0f32; seq_len];

                    for h in 0..h_n {
                        for i in 0..seq_len {
                            let p_row = &p_b[(h * seq_len + i) * seq_len..(h * seq_len + i + 1) * seq_len];
                            let dc_i = &dc_b[i * v_width + h * d_v..i * v_width + (h + 1) * d_v];

                            // dP_ij = dC_i . V_j ; dV_j += P_ij dC_i
                            for j in 0..seq_len {
                                let v_j = &v_b[j * v_width + h * d_v..j * v_width + (h + 1) * d_v];
                                d_scores[j] = dc_i.iter().zip(v_j).map(|(a, b)| a * b).sum::<f32>();
                                let dv_j = &mut dv_b[j * v_width + h * d_v..j * v_width + (h + 1) * d_v];
                                for (d, &c) in dv_j.iter_mut().zip(dc_i) {
                                    *d += p_row[j] * c;
                                }
                            }

                            // softmax backward: dS_ij = P_ij (dP_ij - sum_k P_ik dP_ik)
                            let dot: f32 = p_row.iter().zip(&d_scores).map(|(p, d)| p * d).sum();
                            for j in 0..seq_len {
                                d_scores[j] = p_row[j] * (d_scores[j] - dot) * scale;
                            }

                            let q_off = i * qk_width + h * d_k;
                            for j in 0..seq_len {
                                let k_off = j * qk_width + h * d_k;
                                let ds = d_scores[j];
                                for d in 0..d_k {
                                    dq_b[q_off + d] += ds * k_b[k_off + d];
                                    dk_b[k_off + d] += ds * q_b[q_off + d];
                                }
                            }
                        }
                    }
                });
        }

        let dq = Tensor::from_data(&[batch, seq_len, qk_width], dq);
        let dk = Tensor::from_data(&[batch, seq_len, qk_width], dk);
        let dv = Tensor::from_data(&[batch, seq_len, v_width], dv);

        let mut dx = self.query.backward(&dq)?;
        dx.add_assign(&self.key.backward(&dk)?);
        dx.add_assign(&self.value.backward(&dv)?);
        Ok(dx)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.sublayers()
            .into_iter()
            .flat_map(|(_, layer)| layer.parameters())
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.query.parameters_mut();
        params.extend(self.key.parameters_mut());
        params.extend(self.value.parameters_mut());
        params.extend(self.output.parameters_mut());
        params
    }

    fn gradients(&self) -> Vec<Option<&Tensor>> {
        self.sublayers()
            .into_iter()
            .flat_map(|(_, layer)| layer.gradients())
            .collect()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.sublayers()
            .into_iter()
            .flat_map(|(name, layer)| scoped(name, layer.parameter_names()))
            .collect()
    }

    fn name(&self) -> &str {
        "MultiHeadSelfAttention"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_close, numeric_input_grad, random_tensor, weighted_sum_grad};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_softmax_in_place() {
        let mut row = vec![1.0, 2.0, 3.0];
        softmax_in_place(&mut row);
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(row[2] > row[1] && row[1] > row[0]);
    }

    #[test]
    fn test_output_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let attn = MultiHeadSelfAttention::new(8, 2, 4, 3, &mut rng);
        let out = attn.forward(&random_tensor(&[2, 5, 8], 1)).unwrap();
        assert_eq!(out.shape(), &[2, 5, 8]);
        assert_eq!(attn.parameters().len(), 5);
        assert_eq!(
            attn.parameter_names(),
            vec![
                "query.weights",
                "key.weights",
                "value.weights",
                "output.weights",
                "output.bias"
            ]
        );
    }

    #[test]
    fn test_rejects_2d_input() {
        let mut rng = StdRng::seed_from_u64(0);
        let attn = MultiHeadSelfAttention::new(4, 1, 4, 4, &mut rng);
        assert!(attn.forward(&Tensor::zeros(&[3, 4])).is_err());
    }

    #[test]
    fn test_permutation_equivariance() {
        let mut rng = StdRng::seed_from_u64(5);
        let attn = MultiHeadSelfAttention::new(4, 2, 2, 2, &mut rng);
        let input = random_tensor(&[1, 3, 4], 2);

        // swap positions 0 and 2
        let mut swapped = input.clone();
        let data = swapped.data_mut();
        for d in 0..4 {
            data.swap(d, 8 + d);
        }

        let out = attn.forward(&input).unwrap();
        let out_swapped = attn.forward(&swapped).unwrap();
        assert_close(&out.data()[0..4], &out_swapped.data()[8..12], 1e-5);
        assert_close(&out.data()[4..8], &out_swapped.data()[4..8], 1e-5);
    }

    #[test]
    fn test_attention_gradients() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut attn = MultiHeadSelfAttention::new(4, 2, 3, 2, &mut rng);
        let input = random_tensor(&[2, 3, 4], 4);

        let out = attn.forward_train(&input).unwrap();
        let grad_in = attn.backward(&weighted_sum_grad(out.shape())).unwrap();
        let numeric = numeric_input_grad(&input, |x| attn.forward(x).unwrap());
        assert_close(grad_in.data(), numeric.data(), 2e-2);
        assert!(attn.gradients().iter().all(|g| g.is_some()));
    }
}
