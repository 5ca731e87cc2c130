//! Segmentation configuration loaded from YAML
//!
//! A single [`SegmentationConfig`] is built once (from a file or defaults) and
//! handed by reference to each clusterer's `from_config` constructor.

use crate::data::CORE_FEATURES;
use crate::error::{Result, SegmentError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default)]
    pub fuzzy_clustering: FuzzyConfig,
    #[serde(default)]
    pub neural_clustering: NeuralConfig,
    #[serde(default)]
    pub gmm_clustering: GmmConfig,
    /// Naming conventions for hierarchy-derived enriched columns
    #[serde(default)]
    pub columns: ColumnsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Which table columns take part in a clustering run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureConfig {
    /// Core RFM columns; every one must exist in the input table
    #[serde(default = "default_core_features")]
    pub features_to_use: Vec<String>,
    /// Optional extra columns; absent ones are skipped with a warning
    #[serde(default)]
    pub enriched_features_to_use: Vec<String>,
    #[serde(default)]
    pub use_enriched_features: bool,
}

/// Fuzzy c-means parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzyConfig {
    #[serde(default = "default_n_clusters")]
    pub n_clusters: usize,
    #[serde(default = "default_fuzziness", alias = "m")]
    pub fuzziness_parameter: f64,
    #[serde(default = "default_fuzzy_max_iterations", alias = "max_iter")]
    pub max_iterations: usize,
    #[serde(default = "default_fuzzy_tolerance", alias = "error")]
    pub tolerance: f64,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    #[serde(flatten)]
    pub features: FeatureConfig,
}

/// Autoencoder + k-means parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralConfig {
    #[serde(default = "default_n_clusters")]
    pub n_clusters: usize,
    #[serde(default = "default_encoding_dim")]
    pub encoding_dim: usize,
    #[serde(default = "default_hidden_layers")]
    pub hidden_layers: Vec<usize>,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Random restarts of the latent-space k-means
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    #[serde(flatten)]
    pub features: FeatureConfig,
}

/// Gaussian mixture parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmmConfig {
    #[serde(default = "default_n_clusters")]
    pub n_clusters: usize,
    #[serde(default)]
    pub covariance_type: CovarianceType,
    #[serde(default = "default_gmm_max_iter", alias = "max_iterations")]
    pub max_iter: usize,
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_gmm_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_reg_covar")]
    pub reg_covar: f64,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    #[serde(flatten)]
    pub features: FeatureConfig,
}

/// Shape of the per-component covariance in a Gaussian mixture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceType {
    /// One unrestricted matrix per component
    #[default]
    Full,
    /// One matrix shared by every component
    Tied,
    /// Per-component diagonal
    Diag,
    /// Per-component single variance
    Spherical,
}

impl CovarianceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CovarianceType::Full => "full",
            CovarianceType::Tied => "tied",
            CovarianceType::Diag => "diag",
            CovarianceType::Spherical => "spherical",
        }
    }
}

impl std::str::FromStr for CovarianceType {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(CovarianceType::Full),
            "tied" => Ok(CovarianceType::Tied),
            "diag" => Ok(CovarianceType::Diag),
            "spherical" => Ok(CovarianceType::Spherical),
            other => Err(SegmentError::config(format!(
                "unknown covariance_type '{other}' (expected full, tied, diag or spherical)"
            ))),
        }
    }
}

/// Column naming conventions for the product hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnsConfig {
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default = "default_dept_value_pattern")]
    pub department_value_pattern: String,
    #[serde(default = "default_dept_units_pattern")]
    pub department_units_pattern: String,
    #[serde(default = "default_class_value_pattern")]
    pub class_value_pattern: String,
    #[serde(default = "default_class_units_pattern")]
    pub class_units_pattern: String,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl SegmentationConfig {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SegmentError::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml_str(&contents)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: SegmentationConfig = serde_yaml::from_str(contents)
            .map_err(|e| SegmentError::config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter values that no clusterer can run with
    pub fn validate(&self) -> Result<()> {
        let fuzzy = &self.fuzzy_clustering;
        check_n_clusters("fuzzy_clustering", fuzzy.n_clusters)?;
        if fuzzy.fuzziness_parameter <= 1.0 || !fuzzy.fuzziness_parameter.is_finite() {
            return Err(SegmentError::config(format!(
                "fuzzy_clustering.fuzziness_parameter must be > 1.0, got {}",
                fuzzy.fuzziness_parameter
            )));
        }
        if fuzzy.max_iterations == 0 {
            return Err(SegmentError::config("fuzzy_clustering.max_iterations must be > 0"));
        }

        let neural = &self.neural_clustering;
        check_n_clusters("neural_clustering", neural.n_clusters)?;
        if neural.encoding_dim == 0 {
            return Err(SegmentError::config("neural_clustering.encoding_dim must be > 0"));
        }
        if neural.epochs == 0 || neural.batch_size == 0 {
            return Err(SegmentError::config(
                "neural_clustering.epochs and batch_size must be > 0",
            ));
        }
        if neural.learning_rate <= 0.0 {
            return Err(SegmentError::config("neural_clustering.learning_rate must be > 0"));
        }
        if neural.n_init == 0 {
            return Err(SegmentError::config("neural_clustering.n_init must be > 0"));
        }

        let gmm = &self.gmm_clustering;
        check_n_clusters("gmm_clustering", gmm.n_clusters)?;
        if gmm.max_iter == 0 || gmm.n_init == 0 {
            return Err(SegmentError::config("gmm_clustering.max_iter and n_init must be > 0"));
        }
        if gmm.reg_covar < 0.0 {
            return Err(SegmentError::config("gmm_clustering.reg_covar must be >= 0"));
        }
        Ok(())
    }

    /// Apply a seed to every method section
    pub fn set_random_seed(&mut self, seed: u64) {
        self.fuzzy_clustering.random_seed = seed;
        self.neural_clustering.random_seed = seed;
        self.gmm_clustering.random_seed = seed;
    }

    /// Apply a cluster count to every method section
    pub fn set_n_clusters(&mut self, n_clusters: usize) {
        self.fuzzy_clustering.n_clusters = n_clusters;
        self.neural_clustering.n_clusters = n_clusters;
        self.gmm_clustering.n_clusters = n_clusters;
    }

    /// Toggle enriched features for every method section
    pub fn set_use_enriched(&mut self, enabled: bool) {
        self.fuzzy_clustering.features.use_enriched_features = enabled;
        self.neural_clustering.features.use_enriched_features = enabled;
        self.gmm_clustering.features.use_enriched_features = enabled;
    }
}

impl ColumnsConfig {
    /// Expand department/class names through the naming patterns
    pub fn hierarchy_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for department in &self.departments {
            columns.push(apply_pattern(&self.department_value_pattern, department));
            columns.push(apply_pattern(&self.department_units_pattern, department));
        }
        for class in &self.classes {
            columns.push(apply_pattern(&self.class_value_pattern, class));
            columns.push(apply_pattern(&self.class_units_pattern, class));
        }
        columns
    }
}

fn apply_pattern(pattern: &str, name: &str) -> String {
    pattern.replace("{name}", name)
}

fn check_n_clusters(section: &str, n_clusters: usize) -> Result<()> {
    if n_clusters < 2 {
        return Err(SegmentError::config(format!(
            "{section}.n_clusters must be >= 2, got {n_clusters}"
        )));
    }
    Ok(())
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            features_to_use: default_core_features(),
            enriched_features_to_use: Vec::new(),
            use_enriched_features: false,
        }
    }
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            n_clusters: default_n_clusters(),
            fuzziness_parameter: default_fuzziness(),
            max_iterations: default_fuzzy_max_iterations(),
            tolerance: default_fuzzy_tolerance(),
            random_seed: default_seed(),
            features: FeatureConfig::default(),
        }
    }
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            n_clusters: default_n_clusters(),
            encoding_dim: default_encoding_dim(),
            hidden_layers: default_hidden_layers(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            n_init: default_n_init(),
            random_seed: default_seed(),
            features: FeatureConfig::default(),
        }
    }
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            n_clusters: default_n_clusters(),
            covariance_type: CovarianceType::default(),
            max_iter: default_gmm_max_iter(),
            n_init: default_n_init(),
            tolerance: default_gmm_tolerance(),
            reg_covar: default_reg_covar(),
            random_seed: default_seed(),
            features: FeatureConfig::default(),
        }
    }
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            departments: Vec::new(),
            classes: Vec::new(),
            department_value_pattern: default_dept_value_pattern(),
            department_units_pattern: default_dept_units_pattern(),
            class_value_pattern: default_class_value_pattern(),
            class_units_pattern: default_class_units_pattern(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_core_features() -> Vec<String> {
    CORE_FEATURES.iter().map(|s| s.to_string()).collect()
}

fn default_n_clusters() -> usize {
    4
}

fn default_fuzziness() -> f64 {
    2.0
}

fn default_fuzzy_max_iterations() -> usize {
    150
}

fn default_fuzzy_tolerance() -> f64 {
    0.005
}

fn default_seed() -> u64 {
    42
}

fn default_encoding_dim() -> usize {
    10
}

fn default_hidden_layers() -> Vec<usize> {
    vec![64, 32]
}

fn default_epochs() -> usize {
    100
}

fn default_batch_size() -> usize {
    32
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_n_init() -> usize {
    10
}

fn default_gmm_max_iter() -> usize {
    200
}

fn default_gmm_tolerance() -> f64 {
    1e-3
}

fn default_reg_covar() -> f64 {
    1e-6
}

fn default_dept_value_pattern() -> String {
    "dept_total_value_{name}".to_string()
}

fn default_dept_units_pattern() -> String {
    "dept_total_units_{name}".to_string()
}

fn default_class_value_pattern() -> String {
    "class_total_value_{name}".to_string()
}

fn default_class_units_pattern() -> String {
    "class_total_units_{name}".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SegmentationConfig::default();
        assert_eq!(config.fuzzy_clustering.fuzziness_parameter, 2.0);
        assert_eq!(config.fuzzy_clustering.max_iterations, 150);
        assert_eq!(config.neural_clustering.encoding_dim, 10);
        assert_eq!(config.neural_clustering.batch_size, 32);
        assert_eq!(config.gmm_clustering.max_iter, 200);
        assert_eq!(config.gmm_clustering.n_init, 10);
        assert_eq!(config.gmm_clustering.covariance_type, CovarianceType::Full);
        assert_eq!(config.fuzzy_clustering.features.features_to_use.len(), 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml_with_aliases() {
        let yaml = r#"
fuzzy_clustering:
  n_clusters: 5
  m: 1.5
  error: 0.01
  use_enriched_features: true
  enriched_features_to_use: [dept_total_value_Shoes]
gmm_clustering:
  covariance_type: diag
"#;
        let config = SegmentationConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.fuzzy_clustering.n_clusters, 5);
        assert_eq!(config.fuzzy_clustering.fuzziness_parameter, 1.5);
        assert_eq!(config.fuzzy_clustering.tolerance, 0.01);
        assert!(config.fuzzy_clustering.features.use_enriched_features);
        assert_eq!(
            config.fuzzy_clustering.features.enriched_features_to_use,
            vec!["dept_total_value_Shoes".to_string()]
        );
        assert_eq!(config.gmm_clustering.covariance_type, CovarianceType::Diag);
        assert_eq!(config.neural_clustering.n_clusters, 4);
    }

    #[test]
    fn test_malformed_covariance_type_is_configuration_error() {
        let yaml = "gmm_clustering:\n  covariance_type: banana\n";
        let err = SegmentationConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.is_configuration());

        assert!("TIED".parse::<CovarianceType>().is_ok());
        assert!("circular".parse::<CovarianceType>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let mut config = SegmentationConfig::default();
        config.fuzzy_clustering.fuzziness_parameter = 1.0;
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = SegmentationConfig::default();
        config.set_n_clusters(1);
        assert!(config.validate().is_err());

        let mut config = SegmentationConfig::default();
        config.neural_clustering.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hierarchy_columns_expand_patterns() {
        let columns = ColumnsConfig {
            departments: vec!["Shoes".to_string()],
            classes: vec!["Boots".to_string()],
            ..ColumnsConfig::default()
        };
        assert_eq!(
            columns.hierarchy_columns(),
            vec![
                "dept_total_value_Shoes",
                "dept_total_units_Shoes",
                "class_total_value_Boots",
                "class_total_units_Boots",
            ]
        );
    }

    #[test]
    fn test_overrides_apply_to_all_sections() {
        let mut config = SegmentationConfig::default();
        config.set_random_seed(7);
        config.set_n_clusters(3);
        config.set_use_enriched(true);
        assert_eq!(config.neural_clustering.random_seed, 7);
        assert_eq!(config.gmm_clustering.n_clusters, 3);
        assert!(config.fuzzy_clustering.features.use_enriched_features);
    }
}
