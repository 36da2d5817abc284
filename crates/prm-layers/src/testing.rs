//! Finite-difference helpers shared by the layer tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::tensor::Tensor;

pub(crate) fn random_tensor(shape: &[usize], seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let numel: usize = shape.iter().product();
    Tensor::from_data(shape, (0..numel).map(|_| rng.gen_range(-1.0..1.0)).collect())
}

/// Fixed, non-uniform weights so that `sum(w * y)` exercises every output.
pub(crate) fn weighted_sum_grad(shape: &[usize]) -> Tensor {
    let numel: usize = shape.iter().product();
    let data = (0..numel)
        .map(|i| ((i * 7 + 3) % 11) as f32 / 11.0 - 0.5)
        .collect();
    Tensor::from_data(shape, data)
}

fn weighted_sum(output: &Tensor) -> f64 {
    let weights = weighted_sum_grad(output.shape());
    output
        .data()
        .iter()
        .zip(weights.data())
        .map(|(&y, &w)| y as f64 * w as f64)
        .sum()
}

/// Central differences of `sum(w * f(x))` with respect to every element of `x`.
pub(crate) fn numeric_input_grad<F>(input: &Tensor, f: F) -> Tensor
where
    F: Fn(&Tensor) -> Tensor,
{
    numeric_input_grad_with(input, 1e-2, f)
}

/// Same as [`numeric_input_grad`] with an explicit step, for functions with kinks.
pub(crate) fn numeric_input_grad_with<F>(input: &Tensor, eps: f32, f: F) -> Tensor
where
    F: Fn(&Tensor) -> Tensor,
{
    let mut grad = Vec::with_capacity(input.numel());
    for i in 0..input.numel() {
        let mut plus = input.clone();
        plus.data_mut()[i] += eps;
        let mut minus = input.clone();
        minus.data_mut()[i] -= eps;
        let diff = weighted_sum(&f(&plus)) - weighted_sum(&f(&minus));
        grad.push((diff / (2.0 * eps as f64)) as f32);
    }
    Tensor::from_data(input.shape(), grad)
}

pub(crate) fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol + tol * e.abs(),
            "element {}: {} vs {} (tol {})",
            i,
            a,
            e,
            tol
        );
    }
}
