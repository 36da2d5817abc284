//! Checkpointer trait for save/restore operations.

use crate::state::ModelState;
use crate::{CheckpointError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Trait for checkpoint serialization and deserialization.
pub trait Checkpointer: Send + Sync {
    /// Save model state to `path`, replacing any previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or I/O fails.
    fn save(&self, path: &Path, state: &ModelState) -> Result<()>;

    /// Restore model state from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::NotFound`] if nothing exists at `path`, or
    /// an error if the file is unreadable or malformed.
    fn restore(&self, path: &Path) -> Result<ModelState>;
}

/// JSON-based checkpoint implementation.
#[derive(Debug, Clone, Default)]
pub struct JsonCheckpointer {
    /// Whether to pretty-print JSON output.
    pub pretty: bool,
}

impl JsonCheckpointer {
    /// Create a new JSON checkpointer.
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Create a new JSON checkpointer with pretty printing.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// `<path>.tmp`, the sibling a save is staged in before the rename.
    fn staging_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("checkpoint"));
        name.push(".tmp");
        path.with_file_name(name)
    }
}

impl Checkpointer for JsonCheckpointer {
    fn save(&self, path: &Path, state: &ModelState) -> Result<()> {
        tracing::info!(
            path = %path.display(),
            step = state.global_step,
            epoch = state.epoch,
            "Saving checkpoint"
        );

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let json = if self.pretty {
            serde_json::to_vec_pretty(state)
        } else {
            serde_json::to_vec(state)
        }
        .map_err(CheckpointError::Serialization)?;

        let staging = Self::staging_path(path);
        std::fs::write(&staging, &json).map_err(|e| CheckpointError::Io {
            path: staging.clone(),
            source: e,
        })?;
        std::fs::rename(&staging, path).map_err(|e| CheckpointError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(path = %path.display(), size = json.len(), "Checkpoint saved");
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<ModelState> {
        tracing::info!(path = %path.display(), "Restoring checkpoint");

        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }

        let json = std::fs::read(path).map_err(|e| CheckpointError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let state: ModelState =
            serde_json::from_slice(&json).map_err(CheckpointError::Deserialization)?;
        state.validate()?;

        tracing::info!(
            path = %path.display(),
            step = state.global_step,
            tensors = state.tensors.len(),
            parameters = state.total_parameters(),
            "Checkpoint restored"
        );
        Ok(state)
    }
}
