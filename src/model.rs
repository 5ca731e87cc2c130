//! Common clustering interface implemented by the fuzzy, neural and GMM models

use crate::data::{distinct_row_count, FeatureMatrix};
use crate::error::{Result, SegmentError};
use crate::profile::{ClusterProfile, MethodMetrics};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which algorithm produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringMethod {
    Fuzzy,
    Neural,
    Gmm,
}

impl ClusteringMethod {
    pub const ALL: [ClusteringMethod; 3] = [
        ClusteringMethod::Fuzzy,
        ClusteringMethod::Neural,
        ClusteringMethod::Gmm,
    ];

    /// Short name used in exported file names
    pub fn slug(&self) -> &'static str {
        match self {
            ClusteringMethod::Fuzzy => "fuzzy",
            ClusteringMethod::Neural => "neural",
            ClusteringMethod::Gmm => "gmm",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ClusteringMethod::Fuzzy => "Fuzzy C-Means",
            ClusteringMethod::Neural => "Autoencoder + K-Means",
            ClusteringMethod::Gmm => "Gaussian Mixture Model (GMM)",
        }
    }
}

impl fmt::Display for ClusteringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Output of `fit_predict`
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    /// Hard cluster id per customer
    pub labels: Array1<usize>,
    /// Soft scores (n_samples, n_clusters) for methods that produce them;
    /// each row sums to 1 and its argmax equals the label
    pub memberships: Option<Array2<f64>>,
}

impl ClusterAssignment {
    /// Get cluster sizes
    pub fn cluster_sizes(&self, n_clusters: usize) -> Vec<usize> {
        let mut sizes = vec![0; n_clusters];
        for &label in self.labels.iter() {
            if label < n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Shared contract of the three clustering methods
///
/// Fitting happens on the standardized matrix; `cluster_centers` always
/// reports original feature units.
pub trait Clusterer {
    fn method(&self) -> ClusteringMethod;

    fn n_clusters(&self) -> usize;

    /// Fit on the matrix and return assignments for its rows
    fn fit_predict(&mut self, data: &FeatureMatrix) -> Result<ClusterAssignment>;

    /// Cluster centers (n_clusters, n_features) in original units
    fn cluster_centers(&self) -> Result<Array2<f64>>;

    /// Quality metrics of the fitted model on `data`
    fn evaluate(&self, data: &FeatureMatrix) -> Result<MethodMetrics>;

    /// Per-cluster profile of the fitted model on `data`
    fn generate_profile(&self, data: &FeatureMatrix) -> Result<ClusterProfile>;
}

/// Reject cluster counts the data cannot support
pub fn validate_cluster_count(features: &Array2<f64>, n_clusters: usize) -> Result<()> {
    if n_clusters < 2 {
        return Err(SegmentError::config(format!(
            "n_clusters must be >= 2, got {n_clusters}"
        )));
    }
    let n_samples = features.nrows();
    // One cluster per row leaves no within-cluster spread to score
    if n_clusters >= n_samples {
        return Err(SegmentError::config(format!(
            "n_clusters ({n_clusters}) must be smaller than the number of samples ({n_samples})"
        )));
    }
    let distinct = distinct_row_count(features);
    if distinct < 2 || n_clusters > distinct {
        return Err(SegmentError::config(format!(
            "n_clusters ({n_clusters}) exceeds number of distinct data points ({distinct})"
        )));
    }
    Ok(())
}

/// Ensure `data` has the row count a fitted model was trained on
pub(crate) fn check_same_rows(expected: usize, data: &FeatureMatrix) -> Result<()> {
    if data.n_samples() != expected {
        return Err(SegmentError::config(format!(
            "model was fitted on {expected} rows but data has {}",
            data.n_samples()
        )));
    }
    Ok(())
}

/// Ensure `data` has the column count a fitted model expects
pub(crate) fn check_same_width(expected: usize, features: &Array2<f64>) -> Result<()> {
    if features.ncols() != expected {
        return Err(SegmentError::config(format!(
            "model expects {expected} features but data has {}",
            features.ncols()
        )));
    }
    Ok(())
}
