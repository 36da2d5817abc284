//! Conversion of record batches into fixed-shape feature tensors.
//!
//! The [`Tensorizer`] decodes the JSON columns of a [`Batch`] and assembles
//! them into the [`FeatureBundle`] variant for the configured [`ModelType`].
//! Every array is allocated at the full batch size; rows past the end of a
//! partial batch stay zero and [`TensorBatch::valid_rows`] says how many rows
//! are real.
//!
//! Per-position columns (`icf`, `iv`, `pv`) decode to arrays broadcastable
//! to `[seq_len, arity]`. The user-context column decodes to a vector
//! broadcastable to `[arity]` that is tiled across every position. Labels
//! decode to `[seq_len]`.
//!
//! # Example
//!
//! ```
//! use prm_core::{FeatureSchema, ModelType};
//! use prm_data::tensorize::Tensorizer;
//!
//! let tensorizer =
//!     Tensorizer::new(ModelType::ContextOnly, 512, 30, 7, FeatureSchema::default()).unwrap();
//! assert_eq!(tensorizer.seq_len(), 30);
//! ```

use ndarray::{s, Array2, Array3, ArrayView1, Axis};
use prm_core::{FeatureGroupKind, FeatureSchema, ModelType, PrmError, RerankConfig};

use crate::batch::Batch;
use crate::error::{DataError, Result};
use crate::json::{parse_integer_array, parse_numeric_array};
use crate::record::{Column, RawRecord};

/// The model inputs for one batch, shaped for a specific [`ModelType`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureBundle {
    /// Mode 0: positions and the interaction block.
    ContextOnly {
        /// `[batch, seq_len]` position ids.
        positions: Array2<i32>,
        /// `[batch, seq_len, |iv|]`.
        iv: Array3<f32>,
    },
    /// Mode 1: positions, categorical channels and the interaction block.
    PersonalizedV1 {
        /// `[batch, seq_len]` position ids.
        positions: Array2<i32>,
        /// `[batch, seq_len]` user id repeated at every position.
        user_ids: Array2<i64>,
        /// One `[batch, seq_len]` array per user-context field.
        ucf: Vec<Array2<i64>>,
        /// One `[batch, seq_len]` array per item-content field.
        icf: Vec<Array2<i64>>,
        /// `[batch, seq_len, |iv|]`.
        iv: Array3<f32>,
    },
    /// Mode 2: positions and `icf ++ iv ++ pv` on the feature axis.
    PersonalizedV2 {
        /// `[batch, seq_len]` position ids.
        positions: Array2<i32>,
        /// `[batch, seq_len, |icf| + |iv| + |pv|]`.
        stacked: Array3<f32>,
    },
}

impl FeatureBundle {
    /// Returns the mode this bundle was built for.
    pub fn model_type(&self) -> ModelType {
        match self {
            FeatureBundle::ContextOnly { .. } => ModelType::ContextOnly,
            FeatureBundle::PersonalizedV1 { .. } => ModelType::PersonalizedV1,
            FeatureBundle::PersonalizedV2 { .. } => ModelType::PersonalizedV2,
        }
    }

    /// Returns the `[batch, seq_len]` position ids.
    pub fn positions(&self) -> &Array2<i32> {
        match self {
            FeatureBundle::ContextOnly { positions, .. }
            | FeatureBundle::PersonalizedV1 { positions, .. }
            | FeatureBundle::PersonalizedV2 { positions, .. } => positions,
        }
    }

    /// Returns the dense `[batch, seq_len, width]` block.
    pub fn dense(&self) -> &Array3<f32> {
        match self {
            FeatureBundle::ContextOnly { iv, .. } | FeatureBundle::PersonalizedV1 { iv, .. } => iv,
            FeatureBundle::PersonalizedV2 { stacked, .. } => stacked,
        }
    }

    /// Returns the trailing width of the dense block.
    pub fn dense_width(&self) -> usize {
        self.dense().len_of(Axis(2))
    }

    /// Returns the categorical channels in order: user id, ucf fields, icf fields.
    ///
    /// Empty for modes 0 and 2.
    pub fn categorical(&self) -> Vec<&Array2<i64>> {
        match self {
            FeatureBundle::PersonalizedV1 {
                user_ids, ucf, icf, ..
            } => std::iter::once(user_ids).chain(ucf).chain(icf).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the number of rows, including padding rows.
    pub fn batch_size(&self) -> usize {
        self.positions().nrows()
    }

    /// Returns the candidate list length.
    pub fn seq_len(&self) -> usize {
        self.positions().ncols()
    }

    /// Returns the number of arrays in the model's positional input list.
    pub fn input_arity(&self) -> usize {
        match self {
            FeatureBundle::ContextOnly { .. } | FeatureBundle::PersonalizedV2 { .. } => 2,
            FeatureBundle::PersonalizedV1 { ucf, icf, .. } => 2 + ucf.len() + icf.len() + 1,
        }
    }
}

/// `[batch, seq_len]` relevance labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatrix(Array2<f32>);

impl LabelMatrix {
    /// Wraps a label array.
    pub fn new(labels: Array2<f32>) -> Self {
        Self(labels)
    }

    /// Returns the labels of one row.
    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.0.row(index)
    }

    /// Returns `true` if the row has a positive label sum.
    pub fn has_relevant(&self, index: usize) -> bool {
        self.0.row(index).sum() > 0.0
    }

    /// Returns the underlying array.
    pub fn as_array(&self) -> &Array2<f32> {
        &self.0
    }

    /// Returns the number of rows.
    pub fn nrows(&self) -> usize {
        self.0.nrows()
    }
}

/// A tensorized batch.
#[derive(Debug, Clone)]
pub struct TensorBatch {
    /// Model inputs.
    pub features: FeatureBundle,
    /// Relevance labels.
    pub labels: LabelMatrix,
    /// Number of leading rows backed by real records.
    pub valid_rows: usize,
}

/// Turns batches into [`TensorBatch`]es for one model mode.
#[derive(Debug, Clone)]
pub struct Tensorizer {
    model_type: ModelType,
    batch_size: usize,
    seq_len: usize,
    d_feature: usize,
    schema: FeatureSchema,
}

impl Tensorizer {
    /// Creates a tensorizer.
    ///
    /// # Errors
    ///
    /// Returns [`PrmError::FeatureWidthMismatch`] (wrapped in
    /// [`DataError::Config`]) if `d_feature` disagrees with the schema.
    pub fn new(
        model_type: ModelType,
        batch_size: usize,
        seq_len: usize,
        d_feature: usize,
        schema: FeatureSchema,
    ) -> Result<Self> {
        schema.check_width(model_type, d_feature)?;
        Ok(Self {
            model_type,
            batch_size,
            seq_len,
            d_feature,
            schema,
        })
    }

    /// Creates a tensorizer from a run configuration.
    pub fn from_config(config: &RerankConfig) -> Result<Self> {
        Self::new(
            config.model_type,
            config.data.batch_size,
            config.data.seq_len,
            config.model.d_feature,
            config.schema.clone(),
        )
    }

    /// Returns the configured mode.
    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    /// Returns the candidate list length.
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Returns the configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Decodes a batch.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MalformedRecord`] if any column fails to decode or
    /// has a shape that cannot be broadcast to the expected one.
    pub fn tensorize(&self, batch: &Batch) -> Result<TensorBatch> {
        if batch.len() > self.batch_size {
            return Err(PrmError::config(format!(
                "batch of {} rows exceeds batch_size {}",
                batch.len(),
                self.batch_size
            ))
            .into());
        }
        let records = batch.records();

        let positions = self.positions();
        let labels = LabelMatrix::new(self.labels(records)?);

        let features = match self.model_type {
            ModelType::ContextOnly => FeatureBundle::ContextOnly {
                positions,
                iv: self.per_position(records, Column::Iv, FeatureGroupKind::Iv)?,
            },
            ModelType::PersonalizedV1 => {
                let user_ids = self.user_ids(records);
                let ucf = fan_out(&self.user_context(records)?.insert_axis(Axis(1)), self.seq_len);
                let icf = fan_out(&self.categorical_per_position(records)?, self.seq_len);
                FeatureBundle::PersonalizedV1 {
                    positions,
                    user_ids,
                    ucf,
                    icf,
                    iv: self.per_position(records, Column::Iv, FeatureGroupKind::Iv)?,
                }
            }
            ModelType::PersonalizedV2 => {
                let icf = self.per_position(records, Column::Icf, FeatureGroupKind::Icf)?;
                let iv = self.per_position(records, Column::Iv, FeatureGroupKind::Iv)?;
                let pv = self.per_position(records, Column::Pv, FeatureGroupKind::Pv)?;
                FeatureBundle::PersonalizedV2 {
                    positions,
                    stacked: depth_stack(&[icf, iv, pv])?,
                }
            }
        };

        if features.dense_width() != self.d_feature {
            return Err(PrmError::FeatureWidthMismatch {
                model_type: self.model_type,
                configured: self.d_feature,
                derived: features.dense_width(),
            }
            .into());
        }

        Ok(TensorBatch {
            features,
            labels,
            valid_rows: records.len(),
        })
    }

    fn positions(&self) -> Array2<i32> {
        Array2::from_shape_fn((self.batch_size, self.seq_len), |(_, j)| j as i32)
    }

    fn labels(&self, records: &[RawRecord]) -> Result<Array2<f32>> {
        let mut out = Array2::zeros((self.batch_size, self.seq_len));
        for (i, record) in records.iter().enumerate() {
            let decoded = decode(record, Column::Label)?;
            let view = decoded
                .broadcast(self.seq_len)
                .ok_or_else(|| shape_error(record, Column::Label, decoded.shape(), &[self.seq_len]))?;
            out.row_mut(i).assign(&view);
        }
        Ok(out)
    }

    fn user_ids(&self, records: &[RawRecord]) -> Array2<i64> {
        let mut out = Array2::zeros((self.batch_size, self.seq_len));
        for (i, record) in records.iter().enumerate() {
            out.row_mut(i).fill(record.user_id);
        }
        out
    }

    /// `[batch, |ucf|]` ids, one vector per row.
    fn user_context(&self, records: &[RawRecord]) -> Result<Array2<i64>> {
        let arity = self.schema.arity(FeatureGroupKind::Ucf);
        let mut out = Array2::zeros((self.batch_size, arity));
        for (i, record) in records.iter().enumerate() {
            let decoded = decode_ids(record, Column::Ucf)?;
            let view = decoded
                .broadcast(arity)
                .ok_or_else(|| shape_error(record, Column::Ucf, decoded.shape(), &[arity]))?;
            out.row_mut(i).assign(&view);
        }
        Ok(out)
    }

    /// `[batch, seq_len, arity]` for a per-position column.
    fn per_position(
        &self,
        records: &[RawRecord],
        column: Column,
        group: FeatureGroupKind,
    ) -> Result<Array3<f32>> {
        let arity = self.schema.arity(group);
        let mut out = Array3::zeros((self.batch_size, self.seq_len, arity));
        for (i, record) in records.iter().enumerate() {
            let decoded = decode(record, column)?;
            let view = decoded.broadcast((self.seq_len, arity)).ok_or_else(|| {
                shape_error(record, column, decoded.shape(), &[self.seq_len, arity])
            })?;
            out.slice_mut(s![i, .., ..]).assign(&view);
        }
        Ok(out)
    }

    /// `[batch, seq_len, |icf|]` item ids for the embedding channels.
    fn categorical_per_position(&self, records: &[RawRecord]) -> Result<Array3<i64>> {
        let arity = self.schema.arity(FeatureGroupKind::Icf);
        let mut out = Array3::zeros((self.batch_size, self.seq_len, arity));
        for (i, record) in records.iter().enumerate() {
            let decoded = decode_ids(record, Column::Icf)?;
            let view = decoded.broadcast((self.seq_len, arity)).ok_or_else(|| {
                shape_error(record, Column::Icf, decoded.shape(), &[self.seq_len, arity])
            })?;
            out.slice_mut(s![i, .., ..]).assign(&view);
        }
        Ok(out)
    }
}

fn decode(record: &RawRecord, column: Column) -> Result<ndarray::ArrayD<f32>> {
    parse_numeric_array(record.json(column)).map_err(|message| malformed(record, column, message))
}

fn decode_ids(record: &RawRecord, column: Column) -> Result<ndarray::ArrayD<i64>> {
    parse_integer_array(record.json(column)).map_err(|message| malformed(record, column, message))
}

fn malformed(record: &RawRecord, column: Column, message: String) -> DataError {
    DataError::MalformedRecord {
        line: record.line,
        column: column.name(),
        message,
    }
}

fn shape_error(record: &RawRecord, column: Column, actual: &[usize], expected: &[usize]) -> DataError {
    DataError::MalformedRecord {
        line: record.line,
        column: column.name(),
        message: format!(
            "shape {:?} cannot be broadcast to {:?}",
            actual, expected
        ),
    }
}

/// Splits `[batch, L', k]` into `k` arrays of `[batch, seq_len]`, broadcasting
/// a singleton middle axis across all positions.
fn fan_out(grouped: &Array3<i64>, seq_len: usize) -> Vec<Array2<i64>> {
    let (batch, _, arity) = grouped.dim();
    (0..arity)
        .map(|field| {
            let channel = grouped.index_axis(Axis(2), field);
            Array2::from_shape_fn((batch, seq_len), |(i, j)| {
                let j = if channel.ncols() == 1 { 0 } else { j };
                channel[[i, j]]
            })
        })
        .collect()
}

/// Concatenates `[batch, seq_len, k_i]` blocks along the feature axis.
fn depth_stack(blocks: &[Array3<f32>]) -> Result<Array3<f32>> {
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    ndarray::concatenate(Axis(2), &views)
        .map_err(|e| PrmError::config(format!("cannot stack feature blocks: {}", e)).into())
}
