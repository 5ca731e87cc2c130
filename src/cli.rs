//! Command-line interface definitions and argument parsing

use crate::config::SegmentationConfig;
use crate::model::ClusteringMethod;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yml";

/// Which clustering methods to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Fuzzy,
    Neural,
    Gmm,
    All,
}

impl MethodArg {
    pub fn methods(&self) -> Vec<ClusteringMethod> {
        match self {
            MethodArg::Fuzzy => vec![ClusteringMethod::Fuzzy],
            MethodArg::Neural => vec![ClusteringMethod::Neural],
            MethodArg::Gmm => vec![ClusteringMethod::Gmm],
            MethodArg::All => ClusteringMethod::ALL.to_vec(),
        }
    }
}

/// Customer segmentation with fuzzy c-means, autoencoder k-means and GMM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the customer CSV file
    #[arg(short, long, default_value = "data/customers.csv")]
    pub input: PathBuf,

    /// YAML configuration file [default: config/config.yml when present,
    /// otherwise built-in defaults]
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Clustering method to run
    #[arg(short, long, value_enum, default_value_t = MethodArg::All)]
    pub method: MethodArg,

    /// Number of clusters, overriding every method's configuration
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Random seed, overriding every method's configuration
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Include enriched (department/class) features
    #[arg(short, long)]
    pub enriched: bool,

    /// Directory for exported profiles
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Load the configuration and apply command-line overrides
    ///
    /// # Returns
    /// * The validated configuration, read from `--config`, else from
    ///   [`DEFAULT_CONFIG_PATH`] when that file exists, else built-in defaults
    pub fn resolve_config(&self) -> crate::Result<SegmentationConfig> {
        let path = self.config.clone().or_else(|| {
            let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
            fallback.is_file().then_some(fallback)
        });
        let mut config = match path {
            Some(path) => SegmentationConfig::from_file(path)?,
            None => {
                log::warn!(
                    "No configuration file at {}; using built-in defaults",
                    DEFAULT_CONFIG_PATH
                );
                SegmentationConfig::default()
            }
        };
        if let Some(k) = self.clusters {
            config.set_n_clusters(k);
        }
        if let Some(seed) = self.seed {
            config.set_random_seed(seed);
        }
        if self.enriched {
            config.set_use_enriched(true);
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_clusterer;
    use crate::test_support::blobs;

    #[test]
    fn test_parse_arguments() {
        let args = Args::parse_from([
            "segmentforge",
            "--input",
            "customers.csv",
            "--method",
            "gmm",
            "-k",
            "5",
            "--enriched",
        ]);
        assert_eq!(args.input, PathBuf::from("customers.csv"));
        assert_eq!(args.method, MethodArg::Gmm);
        assert_eq!(args.clusters, Some(5));
        assert!(args.enriched);
        assert!(!args.verbose);
        assert_eq!(args.method.methods(), vec![ClusteringMethod::Gmm]);
    }

    #[test]
    fn test_overrides_applied_to_defaults() {
        let args = Args::parse_from(["segmentforge", "-k", "3", "--seed", "7", "-o", "out"]);
        assert_eq!(args.method.methods().len(), 3);

        let config = args.resolve_config().unwrap();
        assert_eq!(config.fuzzy_clustering.n_clusters, 3);
        assert_eq!(config.neural_clustering.n_clusters, 3);
        assert_eq!(config.gmm_clustering.random_seed, 7);
        assert_eq!(config.paths.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_default_invocation_fits_every_method() {
        let args = Args::parse_from(["segmentforge", "--input", "customers.csv"]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.neural_clustering.encoding_dim, 5);

        // Seven columns, like the core customer features
        let data = blobs(
            &[
                &[0.0; 7],
                &[10.0, 0.0, 10.0, 0.0, 10.0, 0.0, 10.0],
                &[0.0, 10.0, 0.0, 10.0, 0.0, 10.0, 0.0],
                &[10.0; 7],
            ],
            30,
            0.5,
            21,
        );
        for method in args.method.methods() {
            let mut clusterer = build_clusterer(method, &config);
            let assignment = clusterer.fit_predict(&data).unwrap();
            assert_eq!(assignment.labels.len(), 120, "{method}");
        }
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["segmentforge", "-k", "1"]);
        assert!(args.resolve_config().unwrap_err().is_configuration());
    }
}
