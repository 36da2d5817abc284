//! Core types for the PRM personalized re-ranker.
//!
//! This crate holds what every other crate in the workspace agrees on:
//!
//! - **Feature schema**: the immutable registry of feature groups and their
//!   arities, which fixes tensor widths.
//! - **Configuration**: the serde-backed [`RerankConfig`] with production
//!   defaults and a single validation entry point.
//! - **Error types**: configuration errors shared across crates.
//!
//! # Example
//!
//! ```
//! use prm_core::{ModelType, RerankConfig};
//!
//! let config = RerankConfig::default().with_model_type(ModelType::PersonalizedV1);
//! config.validate().unwrap();
//! assert_eq!(config.schema.dense_width(ModelType::PersonalizedV1), 7);
//! ```
//!
//! # Modules
//!
//! - [`config`]: Run configuration and model modes.
//! - [`schema`]: Feature group registry.
//! - [`error`]: Error types for the library.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod schema;

pub use config::{
    prediction_output_path, DataConfig, ModelConfig, ModelType, PathsConfig, RerankConfig,
    TrainingConfig, PREDICTION_SUFFIX,
};
pub use error::{PrmError, Result};
pub use schema::{FeatureGroup, FeatureGroupKind, FeatureSchema};
