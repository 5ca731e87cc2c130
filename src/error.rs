//! Error taxonomy shared by every segmentation component

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, SegmentError>;

/// Errors raised while selecting features, fitting clusterers or exporting profiles
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Invalid parameters or input shape. Always fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Numerical failure the algorithm cannot recover from, e.g. a covariance
    /// matrix that stays singular after regularization.
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    /// An accessor was called before `fit`/`fit_predict`.
    #[error("model must be fitted before calling {0}")]
    NotFitted(&'static str),

    /// Writing a profile file failed. The in-memory profile stays valid.
    #[error("failed to write {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML encoding failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("table error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("k-means failed: {0}")]
    KMeans(#[from] linfa_clustering::KMeansError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SegmentError {
    /// Shorthand for building a [`SegmentError::Configuration`]
    pub fn config(message: impl Into<String>) -> Self {
        SegmentError::Configuration(message.into())
    }

    /// Whether this error belongs to the configuration class
    pub fn is_configuration(&self) -> bool {
        matches!(self, SegmentError::Configuration(_))
    }
}
