//! Error types for record decoding, streaming and tensorization.

use std::path::PathBuf;

use prm_core::PrmError;
use thiserror::Error;

/// Errors produced while turning input files into tensors.
#[derive(Debug, Error)]
pub enum DataError {
    /// A row failed to decode or had the wrong shape.
    #[error("Malformed record at line {line}, column '{column}': {message}")]
    MalformedRecord {
        /// 1-based line number in the source file.
        line: u64,
        /// Name of the offending column.
        column: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// The stream has no more batches. This is the normal end of a finite read.
    #[error("Stream exhausted")]
    StreamExhausted,

    /// A repeating stream completed a pass without yielding a single record.
    #[error("Input file {path} contains no records")]
    EmptySource {
        /// The empty file.
        path: PathBuf,
    },

    /// The input file could not be opened.
    #[error("Failed to open {path}: {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The delimited reader failed mid-file.
    #[error("Failed to read {path}: {source}")]
    Csv {
        /// The file being read.
        path: PathBuf,
        /// The underlying reader error.
        #[source]
        source: csv::Error,
    },

    /// The tensorizer configuration disagrees with the schema.
    #[error(transparent)]
    Config(#[from] PrmError),
}

impl DataError {
    /// Returns `true` for the expected end-of-stream condition.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, DataError::StreamExhausted)
    }
}

/// A specialized Result type for prm-data operations.
pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DataError::MalformedRecord {
            line: 12,
            column: "icf",
            message: "not valid JSON".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed record at line 12, column 'icf': not valid JSON"
        );
        assert_eq!(DataError::StreamExhausted.to_string(), "Stream exhausted");
    }

    #[test]
    fn test_is_exhausted() {
        assert!(DataError::StreamExhausted.is_exhausted());
        assert!(!DataError::EmptySource {
            path: PathBuf::from("x")
        }
        .is_exhausted());
    }
}
