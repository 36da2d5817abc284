//! Weight checkpoints for the re-ranking model.
//!
//! A checkpoint is a single JSON document holding a [`ModelState`]: the
//! training step and epoch it was taken at, free-form string metadata (model
//! type, list length, feature width, ...) and every named weight tensor in
//! model order. The same file serves as the trained-model artifact that the
//! inference path loads.
//!
//! # Example
//!
//! ```no_run
//! use prm_checkpoint::{Checkpointer, JsonCheckpointer, ModelState, TensorState};
//! use std::path::Path;
//!
//! fn main() -> prm_checkpoint::Result<()> {
//!     let mut state = ModelState::new(1000);
//!     state.set_metadata("model_type", "0");
//!     state.add_tensor(TensorState::new("scorer.bias", vec![1], vec![0.0])?);
//!
//!     let checkpointer = JsonCheckpointer::new();
//!     checkpointer.save(Path::new("/tmp/prm_model.json"), &state)?;
//!     let restored = checkpointer.restore(Path::new("/tmp/prm_model.json"))?;
//!     assert_eq!(restored.global_step, 1000);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod checkpointer;
pub mod state;

pub use checkpointer::{Checkpointer, JsonCheckpointer};
pub use state::{ModelState, TensorState, FORMAT_VERSION};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during checkpoint operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O error during checkpoint operations.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint file not found.
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    /// Error during serialization.
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Error during deserialization.
    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Checkpoint format version mismatch.
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version.
        expected: u32,
        /// Found version.
        found: u32,
    },

    /// The checkpoint does not fit the model it is being loaded into.
    #[error("Incompatible checkpoint: {message}")]
    Incompatible {
        /// What did not match.
        message: String,
    },
}

impl CheckpointError {
    /// Shorthand for [`CheckpointError::Incompatible`].
    pub fn incompatible(message: impl Into<String>) -> Self {
        CheckpointError::Incompatible {
            message: message.into(),
        }
    }

    /// Whether the error means "there is no checkpoint at that path".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::NotFound(_))
    }
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_end_to_end_checkpoint_workflow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prm_model.json");

        let mut state = ModelState::new(1000).with_epoch(3);
        state.set_metadata("model_type", "2");
        state.set_metadata("seq_len", "30");
        state.add_tensor(TensorState::new("input_projection.weights", vec![2, 2], vec![0.1, 0.2, 0.3, 0.4]).unwrap());
        state.add_tensor(TensorState::new("input_projection.bias", vec![2], vec![0.0, 1.0]).unwrap());

        JsonCheckpointer::new().save(&path, &state).unwrap();
        let restored = JsonCheckpointer::new().restore(&path).unwrap();

        assert_eq!(restored.global_step, 1000);
        assert_eq!(restored.epoch, 3);
        assert_eq!(restored.tensors.len(), 2);
        assert_eq!(restored.tensors[0].name, "input_projection.weights");
        assert_eq!(restored.metadata("seq_len"), Some("30"));
        assert!(restored.expect_metadata("model_type", "2").is_ok());
    }

    #[test]
    fn test_error_handling() {
        let err = JsonCheckpointer::new()
            .restore(std::path::Path::new("/nonexistent/prm_model.json"))
            .expect_err("restoring a missing checkpoint path should fail");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("nonexistent"));
    }
}
