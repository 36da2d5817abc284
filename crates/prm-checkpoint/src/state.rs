//! Serializable model state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CheckpointError, Result};

/// Current checkpoint format version.
pub const FORMAT_VERSION: u32 = 1;

/// One named, row-major weight tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorState {
    /// Dotted parameter name, e.g. `blocks.0.attention.query.weights`.
    pub name: String,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Flattened values.
    pub data: Vec<f32>,
}

impl TensorState {
    /// Creates a tensor state, checking that `data` fills `shape`.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let state = Self {
            name: name.into(),
            shape,
            data,
        };
        state.validate()?;
        Ok(state)
    }

    /// Number of elements implied by the shape.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    fn validate(&self) -> Result<()> {
        if self.numel() != self.data.len() {
            return Err(CheckpointError::incompatible(format!(
                "tensor {} has shape {:?} but {} values",
                self.name,
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// Complete state of a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    /// Version of the checkpoint format.
    pub version: u32,

    /// Optimizer steps taken when the checkpoint was written.
    pub global_step: u64,

    /// Epoch (1-based) that produced the checkpoint; 0 if not from training.
    #[serde(default)]
    pub epoch: usize,

    /// Timestamp when the checkpoint was created (Unix epoch seconds).
    pub timestamp: u64,

    /// Model description used to check compatibility on load.
    pub metadata: BTreeMap<String, String>,

    /// Weight tensors in model parameter order.
    pub tensors: Vec<TensorState>,
}

impl ModelState {
    /// Create a new empty model state.
    pub fn new(global_step: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            global_step,
            epoch: 0,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            metadata: BTreeMap::new(),
            tensors: Vec::new(),
        }
    }

    /// Sets the epoch the state was taken at.
    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = epoch;
        self
    }

    /// Appends a tensor.
    pub fn add_tensor(&mut self, tensor: TensorState) {
        self.tensors.push(tensor);
    }

    /// Looks a tensor up by name.
    pub fn tensor(&self, name: &str) -> Option<&TensorState> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Set metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl ToString) {
        self.metadata.insert(key.into(), value.to_string());
    }

    /// Get metadata value.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Fails with [`CheckpointError::Incompatible`] unless `key` is present
    /// and equal to `expected`.
    pub fn expect_metadata(&self, key: &str, expected: impl ToString) -> Result<()> {
        let expected = expected.to_string();
        match self.metadata(key) {
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(CheckpointError::incompatible(format!(
                "{} is {} in the checkpoint but {} in the model",
                key, found, expected
            ))),
            None => Err(CheckpointError::incompatible(format!(
                "checkpoint has no {} entry",
                key
            ))),
        }
    }

    /// Total number of scalar weights.
    pub fn total_parameters(&self) -> usize {
        self.tensors.iter().map(|t| t.data.len()).sum()
    }

    /// Checks the format version and every tensor's shape/data agreement.
    pub fn validate(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: FORMAT_VERSION,
                found: self.version,
            });
        }
        self.tensors.iter().try_for_each(TensorState::validate)
    }
}
