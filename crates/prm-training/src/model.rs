//! The sequence re-ranking model.
//!
//! [`SequenceModel`] is the contract the trainer and the evaluator work
//! against. [`PrmModel`] implements it with the transformer network from
//! `prm-layers`, plus one hashed embedding table per categorical channel
//! when the model is built for [`ModelType::PersonalizedV1`].

use ndarray::{Array2, ArrayView1};
use prm_checkpoint::{CheckpointError, ModelState, TensorState};
use prm_core::{ModelType, RerankConfig};
use prm_data::{FeatureBundle, LabelMatrix};
use prm_layers::{
    list_softmax, softmax_cross_entropy, HashedEmbedding, LayerError, PrmConfig, PrmNetwork,
    Tensor,
};
use prm_optimizer::{create_optimizer, OptimizerConfig, OptimizerDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::error::{TrainingError, TrainingResult};

/// Loss and accuracy of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// Mean cross-entropy over the real rows.
    pub loss: f32,
    /// Categorical accuracy over the real rows.
    pub accuracy: f32,
    /// Number of real rows the figures cover.
    pub rows: usize,
}

/// `[batch, seq_len]` scores, a softmax over each list.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionMatrix(Array2<f32>);

impl PredictionMatrix {
    /// Wraps a score array.
    pub fn new(scores: Array2<f32>) -> Self {
        Self(scores)
    }

    /// Scores of one list.
    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.0.row(index)
    }

    /// Number of rows, including padding.
    pub fn nrows(&self) -> usize {
        self.0.nrows()
    }

    /// Returns the underlying array.
    pub fn as_array(&self) -> &Array2<f32> {
        &self.0
    }
}

/// A fixed-shape model that scores candidate lists.
pub trait SequenceModel {
    /// Mode the model was built for.
    fn model_type(&self) -> ModelType;

    /// List length the model was built for.
    fn seq_len(&self) -> usize;

    /// Optimizer steps taken so far.
    fn global_step(&self) -> u64;

    /// Scores every list of the bundle (inference mode).
    fn score(&self, features: &FeatureBundle) -> TrainingResult<PredictionMatrix>;

    /// Runs one optimizer step on the first `valid_rows` rows.
    fn train_step(
        &mut self,
        features: &FeatureBundle,
        labels: &LabelMatrix,
        valid_rows: usize,
        learning_rate: f32,
    ) -> TrainingResult<StepOutput>;

    /// Computes loss and accuracy without updating weights or applying dropout.
    fn evaluate(
        &self,
        features: &FeatureBundle,
        labels: &LabelMatrix,
        valid_rows: usize,
    ) -> TrainingResult<StepOutput>;

    /// Snapshot of every weight plus the metadata needed to check compatibility.
    fn state(&self) -> ModelState;

    /// Restores weights written by [`SequenceModel::state`].
    fn load_state(&mut self, state: &ModelState) -> TrainingResult<()>;
}

/// Personalized re-ranking model.
pub struct PrmModel {
    model_type: ModelType,
    d_feature: usize,
    embedding_dim: usize,
    network: PrmNetwork,
    /// One table per categorical channel; empty outside mode 1.
    embeddings: Vec<HashedEmbedding>,
    optimizers: Option<Vec<Box<dyn OptimizerDyn>>>,
    global_step: u64,
}

impl PrmModel {
    /// Builds an uncompiled model from a validated configuration.
    pub fn build(config: &RerankConfig) -> TrainingResult<Self> {
        let model_type = config.model_type;
        let d_feature = config.model.d_feature;
        config.schema.check_width(model_type, d_feature)?;

        let (channels, embedding_dim) = match model_type {
            ModelType::PersonalizedV1 => (
                config.schema.categorical_channels(),
                config.model.embedding_dim,
            ),
            _ => (0, 0),
        };

        let network = PrmNetwork::new(PrmConfig {
            seq_len: config.data.seq_len,
            d_input: d_feature + channels * embedding_dim,
            d_model: config.model.d_model,
            d_inner_hid: config.model.d_inner_hid,
            n_head: config.model.n_head,
            d_k: config.model.d_k,
            d_v: config.model.d_v,
            n_layers: config.model.n_layers,
            dropout: config.model.dropout,
            seed: config.model.seed,
        })?;

        let mut rng = StdRng::seed_from_u64(config.model.seed.wrapping_add(1));
        let embeddings = (0..channels)
            .map(|_| HashedEmbedding::new(config.model.embedding_buckets, embedding_dim, &mut rng))
            .collect();

        let model = Self {
            model_type,
            d_feature,
            embedding_dim,
            network,
            embeddings,
            optimizers: None,
            global_step: 0,
        };
        info!(
            model_type = %model_type,
            seq_len = config.data.seq_len,
            d_input = model.network.config().d_input,
            parameters = model.parameter_count(),
            "Built re-ranking model"
        );
        Ok(model)
    }

    /// Attaches one optimizer per weight tensor.
    pub fn compile(&mut self, optimizer: OptimizerConfig) -> TrainingResult<()> {
        let count = self.parameter_names().len();
        let optimizers = (0..count)
            .map(|_| create_optimizer(optimizer.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(optimizer = optimizer.name(), tensors = count, "Compiled model");
        self.optimizers = Some(optimizers);
        Ok(())
    }

    /// Whether [`PrmModel::compile`] has run.
    pub fn is_compiled(&self) -> bool {
        self.optimizers.is_some()
    }

    /// Names of every weight tensor, in checkpoint order.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = self.network.parameter_names();
        names.extend((0..self.embeddings.len()).map(|i| format!("embeddings.{}.table", i)));
        names
    }

    /// Total number of scalar weights.
    pub fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|t| t.numel()).sum()
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.network.parameters();
        params.extend(self.embeddings.iter().map(HashedEmbedding::table));
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.network.parameters_mut();
        params.extend(self.embeddings.iter_mut().map(HashedEmbedding::table_mut));
        params
    }

    fn gradients(&self) -> Vec<Option<Vec<f32>>> {
        let mut grads: Vec<Option<Vec<f32>>> = self
            .network
            .gradients()
            .into_iter()
            .map(|g| g.map(|t| t.data().to_vec()))
            .collect();
        grads.extend(
            self.embeddings
                .iter()
                .map(|e| e.table_grad().map(|t| t.data().to_vec())),
        );
        grads
    }

    fn check_bundle(&self, features: &FeatureBundle) -> TrainingResult<()> {
        if features.model_type() != self.model_type {
            return Err(TrainingError::ModeMismatch {
                expected: self.model_type,
                actual: features.model_type(),
            });
        }
        if features.seq_len() != self.seq_len() {
            return Err(TrainingError::SeqLenMismatch {
                expected: self.seq_len(),
                actual: features.seq_len(),
            });
        }
        if features.dense_width() != self.d_feature {
            return Err(LayerError::InvalidInputDimension {
                expected: self.d_feature,
                actual: features.dense_width(),
            }
            .into());
        }
        Ok(())
    }

    /// Flattens the bundle into the network input `[batch, seq_len, d_input]`
    /// and the row-major position ids, caching embedding rows for backward.
    fn assemble_train(&mut self, features: &FeatureBundle) -> TrainingResult<(Tensor, Vec<usize>)> {
        self.check_bundle(features)?;
        let looked_up = features
            .categorical()
            .into_iter()
            .zip(self.embeddings.iter_mut())
            .map(|(channel, table)| {
                let ids: Vec<i64> = channel.iter().copied().collect();
                table.lookup_train(&ids)
            })
            .collect::<Vec<_>>();
        self.concat_input(features, &looked_up)
    }

    fn assemble_inference(
        &self,
        features: &FeatureBundle,
    ) -> TrainingResult<(Tensor, Vec<usize>)> {
        self.check_bundle(features)?;
        let looked_up = features
            .categorical()
            .into_iter()
            .zip(&self.embeddings)
            .map(|(channel, table)| {
                let ids: Vec<i64> = channel.iter().copied().collect();
                table.lookup(&ids)
            })
            .collect::<Vec<_>>();
        self.concat_input(features, &looked_up)
    }

    fn concat_input(
        &self,
        features: &FeatureBundle,
        looked_up: &[Tensor],
    ) -> TrainingResult<(Tensor, Vec<usize>)> {
        let (batch, seq_len) = (features.batch_size(), features.seq_len());
        let d_input = self.network.config().d_input;

        let positions = features
            .positions()
            .iter()
            .map(|&p| {
                usize::try_from(p).map_err(|_| LayerError::ForwardError {
                    message: format!("negative position id {}", p),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dense = features.dense();
        let mut data = Vec::with_capacity(batch * seq_len * d_input);
        for (slot, row) in dense.rows().into_iter().enumerate() {
            data.extend(row.iter().copied());
            for table in looked_up {
                let start = slot * self.embedding_dim;
                data.extend_from_slice(&table.data()[start..start + self.embedding_dim]);
            }
        }
        Ok((Tensor::from_data(&[batch, seq_len, d_input], data), positions))
    }

    /// Routes the input gradient of each embedding slice back to its table.
    fn backward_embeddings(&mut self, grad_input: &Tensor) -> TrainingResult<()> {
        if self.embeddings.is_empty() {
            return Ok(());
        }
        let d_input = self.network.config().d_input;
        let slots = grad_input.numel() / d_input;
        let dim = self.embedding_dim;
        for (c, table) in self.embeddings.iter_mut().enumerate() {
            let offset = self.d_feature + c * dim;
            let mut grad = Vec::with_capacity(slots * dim);
            for row in grad_input.data().chunks(d_input) {
                grad.extend_from_slice(&row[offset..offset + dim]);
            }
            table.backward(&Tensor::from_data(&[slots, dim], grad))?;
        }
        Ok(())
    }

    fn label_tensor(labels: &LabelMatrix) -> Tensor {
        let array = labels.as_array();
        Tensor::from_data(&[array.nrows(), array.ncols()], array.iter().copied().collect())
    }

    fn step_output(
        logits: &Tensor,
        labels: &Tensor,
        valid_rows: usize,
    ) -> TrainingResult<(StepOutput, Tensor)> {
        let rows = valid_rows.min(logits.shape()[0]);
        let loss = softmax_cross_entropy(logits, labels, rows)?;
        let accuracy = categorical_accuracy(logits, labels, rows);
        Ok((
            StepOutput {
                loss: loss.loss,
                accuracy,
                rows,
            },
            loss.grad,
        ))
    }
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Fraction of the first `rows` lists where the first maximum of the scores
/// and of the labels fall on the same position.
fn categorical_accuracy(logits: &Tensor, labels: &Tensor, rows: usize) -> f32 {
    let list = logits.last_dim();
    if rows == 0 || list == 0 {
        return 0.0;
    }
    let hits = logits
        .data()
        .chunks(list)
        .zip(labels.data().chunks(list))
        .take(rows)
        .filter(|(z, y)| argmax(z) == argmax(y))
        .count();
    hits as f32 / rows as f32
}

impl SequenceModel for PrmModel {
    fn model_type(&self) -> ModelType {
        self.model_type
    }

    fn seq_len(&self) -> usize {
        self.network.config().seq_len
    }

    fn global_step(&self) -> u64 {
        self.global_step
    }

    fn score(&self, features: &FeatureBundle) -> TrainingResult<PredictionMatrix> {
        let (input, positions) = self.assemble_inference(features)?;
        let probs = list_softmax(&self.network.forward(&input, &positions)?)?;
        let shape = (probs.shape()[0], probs.shape()[1]);
        let scores = Array2::from_shape_vec(shape, probs.into_data()).map_err(|e| {
            LayerError::ForwardError {
                message: e.to_string(),
            }
        })?;
        Ok(PredictionMatrix::new(scores))
    }

    fn train_step(
        &mut self,
        features: &FeatureBundle,
        labels: &LabelMatrix,
        valid_rows: usize,
        learning_rate: f32,
    ) -> TrainingResult<StepOutput> {
        if self.optimizers.is_none() {
            return Err(TrainingError::NotCompiled);
        }

        self.network.set_training(true);
        let (input, positions) = self.assemble_train(features)?;
        let logits = self.network.forward_train(&input, &positions)?;
        let (output, grad_logits) =
            Self::step_output(&logits, &Self::label_tensor(labels), valid_rows)?;
        let grad_input = self.network.backward(&grad_logits)?;
        self.backward_embeddings(&grad_input)?;

        let grads = self.gradients();
        let mut optimizers = self.optimizers.take().ok_or(TrainingError::NotCompiled)?;
        let updates = self.parameters_mut().into_iter().zip(grads).zip(optimizers.iter_mut());
        for ((param, grad), optimizer) in updates {
            if let Some(grad) = grad {
                optimizer.set_learning_rate(learning_rate);
                optimizer.apply_gradients(param.data_mut(), &grad);
            }
        }
        self.optimizers = Some(optimizers);
        self.global_step += 1;
        Ok(output)
    }

    fn evaluate(
        &self,
        features: &FeatureBundle,
        labels: &LabelMatrix,
        valid_rows: usize,
    ) -> TrainingResult<StepOutput> {
        let (input, positions) = self.assemble_inference(features)?;
        let logits = self.network.forward(&input, &positions)?;
        Ok(Self::step_output(&logits, &Self::label_tensor(labels), valid_rows)?.0)
    }

    fn state(&self) -> ModelState {
        let mut state = ModelState::new(self.global_step);
        let config = self.network.config();
        state.set_metadata("model_type", self.model_type.code());
        state.set_metadata("seq_len", config.seq_len);
        state.set_metadata("d_feature", self.d_feature);
        state.set_metadata("d_input", config.d_input);
        state.set_metadata("d_model", config.d_model);
        state.set_metadata("n_layers", config.n_layers);
        state.set_metadata("embedding_dim", self.embedding_dim);

        for (name, tensor) in self.parameter_names().into_iter().zip(self.parameters()) {
            state.add_tensor(TensorState {
                name,
                shape: tensor.shape().to_vec(),
                data: tensor.data().to_vec(),
            });
        }
        state
    }

    fn load_state(&mut self, state: &ModelState) -> TrainingResult<()> {
        state.expect_metadata("model_type", self.model_type.code())?;
        state.expect_metadata("seq_len", self.seq_len())?;
        state.expect_metadata("d_feature", self.d_feature)?;

        let names = self.parameter_names();
        if state.tensors.len() != names.len() {
            return Err(CheckpointError::incompatible(format!(
                "checkpoint has {} tensors, model has {}",
                state.tensors.len(),
                names.len()
            ))
            .into());
        }

        for (name, param) in names.iter().zip(self.parameters_mut()) {
            let saved = state
                .tensor(name)
                .ok_or_else(|| CheckpointError::incompatible(format!("missing tensor {}", name)))?;
            if saved.shape != param.shape() {
                return Err(CheckpointError::incompatible(format!(
                    "tensor {} has shape {:?} in the checkpoint but {:?} in the model",
                    name,
                    saved.shape,
                    param.shape()
                ))
                .into());
            }
            param.data_mut().copy_from_slice(&saved.data);
        }

        self.global_step = state.global_step;
        info!(step = state.global_step, tensors = names.len(), "Loaded model weights");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn tiny_config(model_type: ModelType) -> RerankConfig {
        let d_feature = match model_type {
            ModelType::PersonalizedV2 => 24,
            _ => 7,
        };
        let mut config = RerankConfig::default()
            .with_model_type(model_type)
            .with_d_feature(d_feature)
            .with_batch_size(2)
            .with_seq_len(3);
        config.model.d_model = 8;
        config.model.d_inner_hid = 8;
        config.model.n_head = 2;
        config.model.d_k = 4;
        config.model.d_v = 4;
        config.model.n_layers = 1;
        config.model.dropout = 0.0;
        config.model.embedding_dim = 2;
        config.model.embedding_buckets = 16;
        config
    }

    fn positions(batch: usize, seq_len: usize) -> Array2<i32> {
        Array2::from_shape_fn((batch, seq_len), |(_, j)| j as i32)
    }

    fn context_bundle(batch: usize, seq_len: usize) -> FeatureBundle {
        FeatureBundle::ContextOnly {
            positions: positions(batch, seq_len),
            iv: Array3::from_shape_fn((batch, seq_len, 7), |(b, l, f)| {
                ((b * 31 + l * 7 + f) % 11) as f32 / 11.0 - 0.3
            }),
        }
    }

    fn personalized_bundle(batch: usize, seq_len: usize) -> FeatureBundle {
        let ids = |k: i64| Array2::from_shape_fn((batch, seq_len), |(b, l)| k * 10 + (b + l) as i64);
        FeatureBundle::PersonalizedV1 {
            positions: positions(batch, seq_len),
            user_ids: ids(1),
            ucf: (0..3).map(|k| ids(k + 2)).collect(),
            icf: (0..5).map(|k| ids(k + 5)).collect(),
            iv: Array3::from_elem((batch, seq_len, 7), 0.1),
        }
    }

    fn labels(batch: usize, seq_len: usize) -> LabelMatrix {
        LabelMatrix::new(Array2::from_shape_fn((batch, seq_len), |(b, l)| {
            if l == (b + 1) % seq_len {
                1.0
            } else {
                0.0
            }
        }))
    }

    fn compiled(model_type: ModelType) -> PrmModel {
        let mut model = PrmModel::build(&tiny_config(model_type)).unwrap();
        model
            .compile(OptimizerConfig::Adam {
                learning_rate: 0.01,
                beta1: 0.9,
                beta2: 0.98,
                epsilon: 1e-9,
            })
            .unwrap();
        model
    }

    #[test]
    fn test_scores_are_list_softmax() {
        let model = compiled(ModelType::ContextOnly);
        let scores = model.score(&context_bundle(2, 3)).unwrap();
        assert_eq!(scores.as_array().dim(), (2, 3));
        for i in 0..2 {
            assert!((scores.row(i).sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_train_step_requires_compile() {
        let mut model = PrmModel::build(&tiny_config(ModelType::ContextOnly)).unwrap();
        assert!(!model.is_compiled());
        let err = model.train_step(&context_bundle(2, 3), &labels(2, 3), 2, 0.01);
        assert!(matches!(err, Err(TrainingError::NotCompiled)));
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut model = compiled(ModelType::ContextOnly);
        let (features, labels) = (context_bundle(2, 3), labels(2, 3));
        let before = model.evaluate(&features, &labels, 2).unwrap().loss;
        for _ in 0..30 {
            model.train_step(&features, &labels, 2, 0.01).unwrap();
        }
        let after = model.evaluate(&features, &labels, 2).unwrap();
        assert!(after.loss < before, "{} !< {}", after.loss, before);
        assert_eq!(model.global_step(), 30);
    }

    #[test]
    fn test_personalized_v1_updates_embeddings() {
        let mut model = compiled(ModelType::PersonalizedV1);
        assert_eq!(model.embeddings.len(), 9);
        assert_eq!(model.network.config().d_input, 7 + 9 * 2);

        let before = model.embeddings[0].table().clone();
        model
            .train_step(&personalized_bundle(2, 3), &labels(2, 3), 2, 0.05)
            .unwrap();
        assert_ne!(model.embeddings[0].table(), &before);
    }

    #[test]
    fn test_rejects_other_mode() {
        let model = compiled(ModelType::PersonalizedV2);
        assert!(matches!(
            model.score(&context_bundle(2, 3)),
            Err(TrainingError::ModeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_other_seq_len() {
        let model = compiled(ModelType::ContextOnly);
        assert!(matches!(
            model.score(&context_bundle(2, 4)),
            Err(TrainingError::SeqLenMismatch { .. })
        ));
    }

    #[test]
    fn test_padding_rows_do_not_count() {
        let model = compiled(ModelType::ContextOnly);
        let features = context_bundle(2, 3);
        let full = model.evaluate(&features, &labels(2, 3), 2).unwrap();
        let first = model.evaluate(&features, &labels(2, 3), 1).unwrap();
        assert_eq!(full.rows, 2);
        assert_eq!(first.rows, 1);
        assert_ne!(full.loss, first.loss);
    }

    #[test]
    fn test_state_round_trip() {
        let mut trained = compiled(ModelType::PersonalizedV1);
        trained
            .train_step(&personalized_bundle(2, 3), &labels(2, 3), 2, 0.05)
            .unwrap();
        let state = trained.state();
        assert_eq!(state.metadata("model_type"), Some("1"));
        assert_eq!(state.tensors.len(), trained.parameter_names().len());

        let mut fresh = PrmModel::build(&tiny_config(ModelType::PersonalizedV1)).unwrap();
        fresh.load_state(&state).unwrap();
        let features = personalized_bundle(2, 3);
        assert_eq!(
            fresh.score(&features).unwrap(),
            trained.score(&features).unwrap()
        );
        assert_eq!(fresh.global_step(), 1);
    }

    #[test]
    fn test_load_state_rejects_other_mode() {
        let state = compiled(ModelType::ContextOnly).state();
        let mut other = PrmModel::build(&tiny_config(ModelType::PersonalizedV2)).unwrap();
        assert!(matches!(
            other.load_state(&state),
            Err(TrainingError::Checkpoint(CheckpointError::Incompatible { .. }))
        ));
    }

    #[test]
    fn test_categorical_accuracy_first_max() {
        let logits = Tensor::from_data(&[2, 3], vec![0.1, 0.9, 0.9, 0.5, 0.2, 0.1]);
        let labels = Tensor::from_data(&[2, 3], vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(categorical_accuracy(&logits, &labels, 2), 0.5);
    }
}
