//! Error types for the PRM core library.
//!
//! Everything in this module is a configuration problem: it is detected at
//! startup (or at the first batch) and is not recoverable by retrying.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ModelType;

/// The main error type for prm-core operations.
#[derive(Debug, Error)]
pub enum PrmError {
    /// Error during configuration parsing or validation.
    #[error("Configuration error: {message}")]
    Config {
        /// A description of the configuration error.
        message: String,
    },

    /// The configured feature width does not match the schema for the active mode.
    #[error(
        "Feature width mismatch for model type {model_type}: d_feature is {configured}, \
         but the schema yields {derived}"
    )]
    FeatureWidthMismatch {
        /// The active model mode.
        model_type: ModelType,
        /// The `d_feature` value from the configuration.
        configured: usize,
        /// The width derived from the feature schema.
        derived: usize,
    },

    /// A model type code outside `0..=2`.
    #[error("Invalid model type {code}: expected 0, 1 or 2")]
    InvalidModelType {
        /// The rejected code.
        code: u8,
    },

    /// A required path was not configured.
    #[error("Missing required path: {name}")]
    MissingPath {
        /// The configuration key that was left empty.
        name: &'static str,
    },

    /// The feature schema is missing a group or has an empty group.
    #[error("Invalid feature schema: {message}")]
    InvalidSchema {
        /// A description of the schema problem.
        message: String,
    },

    /// The configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::config::RerankConfig`].
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl PrmError {
    /// Creates a [`PrmError::Config`] from anything printable.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// A specialized Result type for prm-core operations.
pub type Result<T> = std::result::Result<T, PrmError>;
