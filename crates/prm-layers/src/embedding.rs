//! Hashed embedding tables for categorical ids.
//!
//! Ids are mapped to rows by `id mod num_buckets` (always non-negative), so
//! any integer id is accepted without a vocabulary.

use rand::Rng;

use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::tensor::Tensor;

/// A `[num_buckets, dim]` table looked up by integer id.
#[derive(Debug, Clone)]
pub struct HashedEmbedding {
    table: Tensor,
    table_grad: Option<Tensor>,
    cached_rows: Option<Vec<usize>>,
    num_buckets: usize,
    dim: usize,
}

impl HashedEmbedding {
    /// Creates a table initialized from `N(0, 0.05)`.
    pub fn new<R: Rng + ?Sized>(num_buckets: usize, dim: usize, rng: &mut R) -> Self {
        Self {
            table: Initializer::Normal { std: 0.05 }.initialize(&[num_buckets, dim], rng),
            table_grad: None,
            cached_rows: None,
            num_buckets,
            dim,
        }
    }

    /// Returns the embedding width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns the table row an id maps to.
    pub fn bucket(&self, id: i64) -> usize {
        id.rem_euclid(self.num_buckets as i64) as usize
    }

    /// Looks up `ids`, returning `[ids.len(), dim]`.
    pub fn lookup(&self, ids: &[i64]) -> Tensor {
        let rows: Vec<usize> = ids.iter().map(|&id| self.bucket(id)).collect();
        self.gather(&rows)
    }

    /// Looks up `ids` and remembers the rows for [`HashedEmbedding::backward`].
    pub fn lookup_train(&mut self, ids: &[i64]) -> Tensor {
        let rows: Vec<usize> = ids.iter().map(|&id| self.bucket(id)).collect();
        let out = self.gather(&rows);
        self.cached_rows = Some(rows);
        out
    }

    /// Scatter-adds `grad` (`[n, dim]`) into a dense table gradient.
    pub fn backward(&mut self, grad: &Tensor) -> Result<(), LayerError> {
        let rows = self
            .cached_rows
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        if grad.shape() != [rows.len(), self.dim] {
            return Err(LayerError::ShapeMismatch {
                expected: vec![rows.len(), self.dim],
                actual: grad.shape().to_vec(),
            });
        }

        let mut table_grad = Tensor::zeros(&[self.num_buckets, self.dim]);
        let dst = table_grad.data_mut();
        for (&row, g) in rows.iter().zip(grad.data().chunks(self.dim)) {
            for (d, v) in dst[row * self.dim..(row + 1) * self.dim].iter_mut().zip(g) {
                *d += v;
            }
        }
        self.table_grad = Some(table_grad);
        Ok(())
    }

    /// Returns the table.
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    /// Returns the table mutably.
    pub fn table_mut(&mut self) -> &mut Tensor {
        &mut self.table
    }

    /// Returns the most recent table gradient.
    pub fn table_grad(&self) -> Option<&Tensor> {
        self.table_grad.as_ref()
    }

    fn gather(&self, rows: &[usize]) -> Tensor {
        let src = self.table.data();
        let mut data = Vec::with_capacity(rows.len() * self.dim);
        for &row in rows {
            data.extend_from_slice(&src[row * self.dim..(row + 1) * self.dim]);
        }
        Tensor::from_data(&[rows.len(), self.dim], data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bucket_wraps_negative_ids() {
        let mut rng = StdRng::seed_from_u64(0);
        let emb = HashedEmbedding::new(10, 4, &mut rng);
        assert_eq!(emb.bucket(13), 3);
        assert_eq!(emb.bucket(-1), 9);
    }

    #[test]
    fn test_lookup_shares_rows() {
        let mut rng = StdRng::seed_from_u64(0);
        let emb = HashedEmbedding::new(10, 4, &mut rng);
        let out = emb.lookup(&[3, 13, 4]);
        assert_eq!(out.shape(), &[3, 4]);
        assert_eq!(out.data()[0..4], out.data()[4..8]);
        assert_ne!(out.data()[0..4], out.data()[8..12]);
    }

    #[test]
    fn test_backward_accumulates_repeated_ids() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut emb = HashedEmbedding::new(5, 2, &mut rng);
        emb.lookup_train(&[1, 6, 2]);
        emb.backward(&Tensor::ones(&[3, 2])).unwrap();

        let grad = emb.table_grad().unwrap();
        assert_eq!(&grad.data()[2..4], &[2.0, 2.0]);
        assert_eq!(&grad.data()[4..6], &[1.0, 1.0]);
        assert_eq!(&grad.data()[0..2], &[0.0, 0.0]);
    }

    #[test]
    fn test_backward_requires_lookup_train() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut emb = HashedEmbedding::new(5, 2, &mut rng);
        assert!(matches!(
            emb.backward(&Tensor::ones(&[1, 2])),
            Err(LayerError::NotInitialized)
        ));
    }
}
