//! Cluster profile schema, generation and JSON/YAML export
//!
//! A profile is the hand-off artifact for downstream segment naming. Its core
//! shape is identical across methods; each method adds a documented extension
//! to every cluster block.

use crate::config::CovarianceType;
use crate::data::FeatureMatrix;
use crate::error::{Result, SegmentError};
use crate::model::ClusteringMethod;
use chrono::Utc;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Complete profile of one clustering run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub metadata: ProfileMetadata,
    pub metrics: MethodMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty_metrics: Option<UncertaintyMetrics>,
    /// Columns in matrix order
    pub features_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixture_weights: Option<Vec<f64>>,
    /// Keyed `cluster_<id>`; only clusters with at least one member appear
    pub clusters: BTreeMap<String, ClusterSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub method: ClusteringMethod,
    pub method_name: String,
    /// RFC 3339, UTC
    pub timestamp: String,
    pub n_clusters: usize,
    pub n_samples: usize,
    pub parameters: MethodParameters,
}

impl ProfileMetadata {
    pub fn new(
        method: ClusteringMethod,
        n_clusters: usize,
        n_samples: usize,
        parameters: MethodParameters,
    ) -> Self {
        Self {
            method,
            method_name: method.display_name().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            n_clusters,
            n_samples,
            parameters,
        }
    }
}

/// Hyperparameters recorded in the metadata block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodParameters {
    Gmm(GmmParameters),
    Fuzzy(FuzzyParameters),
    Neural(NeuralParameters),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyParameters {
    pub fuzziness_parameter: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub random_seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralParameters {
    pub encoding_dim: usize,
    pub hidden_layers: Vec<usize>,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub random_seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmmParameters {
    pub covariance_type: CovarianceType,
    pub max_iterations: usize,
    pub n_initializations: usize,
    pub tolerance: f64,
    pub reg_covar: f64,
    pub random_seed: u64,
    pub converged: bool,
    pub n_iterations: usize,
}

/// Quality metrics; `silhouette_score` is always present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodMetrics {
    Gmm(GmmMetrics),
    Fuzzy(FuzzyMetrics),
    Neural(NeuralMetrics),
}

impl MethodMetrics {
    pub fn silhouette_score(&self) -> f64 {
        match self {
            MethodMetrics::Gmm(m) => m.silhouette_score,
            MethodMetrics::Fuzzy(m) => m.silhouette_score,
            MethodMetrics::Neural(m) => m.silhouette_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyMetrics {
    pub silhouette_score: f64,
    pub partition_coefficient: f64,
    pub partition_entropy: f64,
    pub converged: bool,
    pub n_iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralMetrics {
    /// Computed in the latent space
    pub silhouette_score: f64,
    /// Mean squared error between standardized input and reconstruction
    pub reconstruction_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmmMetrics {
    pub silhouette_score: f64,
    pub bic: f64,
    pub aic: f64,
    pub davies_bouldin_index: f64,
    pub calinski_harabasz_score: f64,
    pub log_likelihood: f64,
    pub converged: bool,
    pub n_iterations: usize,
}

/// Assignment confidence derived from mixture probabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyMetrics {
    pub avg_max_probability: f64,
    pub std_max_probability: f64,
    pub high_confidence_count: usize,
    pub high_confidence_pct: f64,
    pub low_confidence_count: usize,
    pub low_confidence_pct: f64,
    pub avg_entropy: f64,
    pub max_entropy: f64,
}

/// One cluster's block in the profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub size: usize,
    pub percentage: f64,
    pub cluster_center: BTreeMap<String, f64>,
    pub feature_statistics: BTreeMap<String, FeatureStatistics>,
    #[serde(flatten)]
    pub extension: ClusterExtension,
}

/// Method-specific per-cluster fields, inlined next to the common ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClusterExtension {
    Gmm {
        mixture_weight: f64,
        probability_stats: SummaryStats,
        covariance_info: CovarianceInfo,
    },
    Fuzzy {
        membership_stats: SummaryStats,
    },
    Neural {
        encoded_space_stats: DistanceStats,
    },
}

/// Descriptive statistics of one feature within a cluster, original units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStatistics {
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; 0 for single-member clusters
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
}

/// Distribution of membership degrees or probabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

/// Distances from members to their latent-space centroid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceStats {
    pub mean_distance: f64,
    pub std_distance: f64,
    pub max_distance: f64,
}

/// Covariance diagonal of a mixture component, standardized units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceInfo {
    #[serde(rename = "type")]
    pub covariance_type: CovarianceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_variances: Option<BTreeMap<String, f64>>,
    /// Single shared variance, spherical components only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
}

/// Builds profiles from a fitted model's outputs and the original-unit data
pub struct ClusterProfiler<'a> {
    data: &'a FeatureMatrix,
}

impl<'a> ClusterProfiler<'a> {
    pub fn new(data: &'a FeatureMatrix) -> Self {
        Self { data }
    }

    /// Assemble the profile
    ///
    /// `extend` receives each present cluster id with the row indices assigned
    /// to it and returns that cluster's method-specific block.
    pub fn generate_profile<F>(
        &self,
        labels: &Array1<usize>,
        centers: &Array2<f64>,
        metrics: MethodMetrics,
        metadata: ProfileMetadata,
        mut extend: F,
    ) -> Result<ClusterProfile>
    where
        F: FnMut(usize, &[usize]) -> Result<ClusterExtension>,
    {
        let n_samples = self.data.n_samples();
        if labels.len() != n_samples {
            return Err(SegmentError::config(format!(
                "{} labels for {} rows",
                labels.len(),
                n_samples
            )));
        }
        if centers.ncols() != self.data.n_features() {
            return Err(SegmentError::config(format!(
                "centers have {} columns, data has {}",
                centers.ncols(),
                self.data.n_features()
            )));
        }

        let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &label) in labels.iter().enumerate() {
            if label >= centers.nrows() {
                return Err(SegmentError::config(format!(
                    "label {label} has no cluster center"
                )));
            }
            members.entry(label).or_default().push(row);
        }

        let mut clusters = BTreeMap::new();
        for (cluster_id, rows) in members {
            let cluster_center = self
                .data
                .columns
                .iter()
                .zip(centers.row(cluster_id).iter())
                .map(|(name, &value)| (name.clone(), value))
                .collect();

            let feature_statistics = self
                .data
                .columns
                .iter()
                .enumerate()
                .map(|(j, name)| {
                    let values: Vec<f64> =
                        rows.iter().map(|&r| self.data.raw_features[[r, j]]).collect();
                    (name.clone(), feature_statistics(&values))
                })
                .collect();

            let summary = ClusterSummary {
                cluster_id,
                size: rows.len(),
                percentage: rows.len() as f64 / n_samples as f64 * 100.0,
                cluster_center,
                feature_statistics,
                extension: extend(cluster_id, &rows)?,
            };
            clusters.insert(format!("cluster_{cluster_id}"), summary);
        }

        Ok(ClusterProfile {
            metadata,
            metrics,
            uncertainty_metrics: None,
            features_used: self.data.columns.clone(),
            mixture_weights: None,
            clusters,
        })
    }
}

/// Paths of an exported profile plus the profile itself
#[derive(Debug, Clone)]
pub struct ExportedProfile {
    pub json_path: PathBuf,
    pub yaml_path: PathBuf,
    pub profile: ClusterProfile,
}

/// Write the profile as `{method}_cluster_profile_{timestamp}.json` and `.yaml`
///
/// # Arguments
/// * `profile` - Profile to serialize
/// * `output_dir` - Target directory, created when missing
///
/// # Returns
/// * `ExportedProfile` holding both file paths and a copy of the profile
///
/// Both encodings are built in memory before any file is opened. Existing
/// files are never overwritten; a taken name gets a `_1`, `_2`, ... suffix.
/// A failure leaves the in-memory profile untouched for the caller to retry
/// or inspect.
pub fn export_profile(
    profile: &ClusterProfile,
    output_dir: impl AsRef<Path>,
) -> Result<ExportedProfile> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir).map_err(|source| SegmentError::Serialization {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let json = serde_json::to_vec_pretty(profile)?;
    let yaml = serde_yaml::to_string(profile)?;

    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let base = format!(
        "{}_cluster_profile_{}",
        profile.metadata.method.slug(),
        timestamp
    );
    let (json_path, yaml_path) = unused_paths(output_dir, &base);

    write_new_file(&json_path, &json)?;
    if let Err(err) = write_new_file(&yaml_path, yaml.as_bytes()) {
        // No half exports
        if let Err(remove) = std::fs::remove_file(&json_path) {
            log::warn!("Could not remove {}: {}", json_path.display(), remove);
        }
        return Err(err);
    }

    log::info!(
        "Exported {} profile to {} and {}",
        profile.metadata.method.slug(),
        json_path.display(),
        yaml_path.display()
    );

    Ok(ExportedProfile {
        json_path,
        yaml_path,
        profile: profile.clone(),
    })
}

/// First `{base}[_n].json` / `.yaml` pair with neither file present
fn unused_paths(dir: &Path, base: &str) -> (PathBuf, PathBuf) {
    let mut suffix = 0usize;
    loop {
        let stem = if suffix == 0 {
            base.to_string()
        } else {
            format!("{base}_{suffix}")
        };
        let json_path = dir.join(format!("{stem}.json"));
        let yaml_path = dir.join(format!("{stem}.yaml"));
        if !json_path.exists() && !yaml_path.exists() {
            return (json_path, yaml_path);
        }
        suffix += 1;
    }
}

/// Create `path` (failing if it exists) and write `contents`
fn write_new_file(path: &Path, contents: &[u8]) -> Result<()> {
    let io_error = |source| SegmentError::Serialization {
        path: path.to_path_buf(),
        source,
    };
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(contents).map_err(io_error)?;
    writer.flush().map_err(io_error)
}

/// Mean/median/std/min/max/quartiles of a non-empty slice
pub fn feature_statistics(values: &[f64]) -> FeatureStatistics {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let std = if sorted.len() > 1 {
        (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    FeatureStatistics {
        mean,
        median: quantile(&sorted, 0.5),
        std,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        q25: quantile(&sorted, 0.25),
        q75: quantile(&sorted, 0.75),
    }
}

/// Mean/std/min/max/median of a non-empty slice, population std
pub fn summary_stats(values: &[f64]) -> SummaryStats {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let std = (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    SummaryStats {
        mean,
        std,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        median: quantile(&sorted, 0.5),
    }
}

/// Membership/probability column `cluster_id` restricted to `rows`
pub fn soft_score_stats(scores: &Array2<f64>, cluster_id: usize, rows: &[usize]) -> SummaryStats {
    let values: Vec<f64> = rows.iter().map(|&r| scores[[r, cluster_id]]).collect();
    summary_stats(&values)
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
