//! SegmentForge: retail customer segmentation with three clustering methods
//!
//! A customer table is reduced to a standardized feature matrix, clustered with
//! fuzzy c-means, an autoencoder + k-means pipeline or a Gaussian mixture, and
//! summarized into a per-cluster profile exported as JSON and YAML.

pub mod autoencoder;
pub mod cli;
pub mod config;
pub mod data;
pub mod enrichment;
pub mod error;
pub mod fuzzy;
pub mod gmm;
pub mod metrics;
pub mod model;
pub mod neural;
pub mod profile;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export public items for easier access
pub use cli::{Args, MethodArg};
pub use config::{CovarianceType, SegmentationConfig};
pub use data::{load_customer_table, select_and_scale, select_features, FeatureMatrix, ScalerState};
pub use enrichment::ClusterEnrichment;
pub use error::{Result, SegmentError};
pub use fuzzy::FuzzyClusterer;
pub use gmm::{Covariances, GmmClusterer};
pub use model::{ClusterAssignment, Clusterer, ClusteringMethod};
pub use neural::NeuralClusterer;
pub use profile::{export_profile, ClusterProfile, ClusterProfiler, ExportedProfile};

/// Build the clusterer for `method` from its configuration section
pub fn build_clusterer(
    method: ClusteringMethod,
    config: &SegmentationConfig,
) -> Box<dyn Clusterer> {
    match method {
        ClusteringMethod::Fuzzy => Box::new(FuzzyClusterer::from_config(&config.fuzzy_clustering)),
        ClusteringMethod::Neural => {
            Box::new(NeuralClusterer::from_config(&config.neural_clustering))
        }
        ClusteringMethod::Gmm => Box::new(GmmClusterer::from_config(&config.gmm_clustering)),
    }
}

/// Feature selection settings of the section that drives `method`
pub fn feature_config(
    method: ClusteringMethod,
    config: &SegmentationConfig,
) -> &config::FeatureConfig {
    match method {
        ClusteringMethod::Fuzzy => &config.fuzzy_clustering.features,
        ClusteringMethod::Neural => &config.neural_clustering.features,
        ClusteringMethod::Gmm => &config.gmm_clustering.features,
    }
}
