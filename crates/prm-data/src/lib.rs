//! Input pipeline for the PRM re-ranker.
//!
//! This crate turns `|`-delimited text files into the tensors a sequence
//! model consumes:
//!
//! - [`record`]: decodes one row into a [`RawRecord`].
//! - [`stream`]: reads a file once, N times or forever and groups records
//!   into [`Batch`]es.
//! - [`tensorize`]: assembles a batch into the [`FeatureBundle`] for the
//!   configured model mode, plus its [`LabelMatrix`].
//!
//! # Example
//!
//! ```no_run
//! use prm_core::RerankConfig;
//! use prm_data::{BatchStream, StreamMode, Tensorizer};
//!
//! let config = RerankConfig::default();
//! let tensorizer = Tensorizer::from_config(&config).unwrap();
//! let mut stream = BatchStream::open("test.txt", b'|', StreamMode::Once, 512).unwrap();
//! for batch in &mut stream {
//!     let tensors = tensorizer.tensorize(&batch.unwrap()).unwrap();
//!     println!("{} real rows", tensors.valid_rows);
//! }
//! ```

#![warn(missing_docs)]

pub mod batch;
pub mod error;
mod json;
pub mod record;
pub mod stream;
pub mod tensorize;

pub use batch::Batch;
pub use error::{DataError, Result};
pub use record::{normalize_nulls, Column, RawRecord};
pub use stream::{BatchStream, RecordStream, StreamMode};
pub use tensorize::{FeatureBundle, LabelMatrix, TensorBatch, Tensorizer};
