//! Autoencoder + k-means clustering
//!
//! Standardized features are compressed by a trained autoencoder and the
//! latent codes are partitioned with k-means. Cluster centers are reported as
//! the mean of each cluster's members in original units, since the decoder's
//! image of a latent centroid is not guaranteed to be representative.

use crate::autoencoder::Autoencoder;
use crate::config::NeuralConfig;
use crate::data::{FeatureMatrix, ScalerState};
use crate::error::{Result, SegmentError};
use crate::metrics::{self, euclidean_distance};
use crate::model::{
    check_same_rows, check_same_width, validate_cluster_count, ClusterAssignment, Clusterer,
    ClusteringMethod,
};
use crate::profile::{
    ClusterExtension, ClusterProfile, ClusterProfiler, DistanceStats, MethodMetrics,
    MethodParameters, NeuralMetrics, NeuralParameters, ProfileMetadata,
};
use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Autoencoder + k-means clusterer
#[derive(Debug, Clone)]
pub struct NeuralClusterer {
    n_clusters: usize,
    encoding_dim: usize,
    hidden_layers: Vec<usize>,
    epochs: usize,
    batch_size: usize,
    learning_rate: f64,
    n_init: usize,
    seed: u64,
    state: Option<NeuralState>,
}

#[derive(Debug, Clone)]
struct NeuralState {
    autoencoder: Autoencoder,
    kmeans: KMeans<f64, L2Dist>,
    /// Latent codes of the training rows
    encoded: Array2<f64>,
    labels: Array1<usize>,
    /// Member means in original units (n_clusters, n_features)
    centers: Array2<f64>,
    history: Vec<f64>,
}

impl NeuralClusterer {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            encoding_dim: 10,
            hidden_layers: vec![64, 32],
            epochs: 100,
            batch_size: 32,
            learning_rate: 1e-3,
            n_init: 10,
            seed: 42,
            state: None,
        }
    }

    pub fn from_config(config: &NeuralConfig) -> Self {
        Self::new(config.n_clusters)
            .with_encoding_dim(config.encoding_dim)
            .with_hidden_layers(config.hidden_layers.clone())
            .with_epochs(config.epochs)
            .with_batch_size(config.batch_size)
            .with_learning_rate(config.learning_rate)
            .with_n_init(config.n_init)
            .with_seed(config.random_seed)
    }

    /// Latent width; must be smaller than the number of features
    pub fn with_encoding_dim(mut self, encoding_dim: usize) -> Self {
        self.encoding_dim = encoding_dim;
        self
    }

    pub fn with_hidden_layers(mut self, hidden_layers: Vec<usize>) -> Self {
        self.hidden_layers = hidden_layers;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Number of k-means restarts in the latent space
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Mean training loss per epoch of the last fit
    pub fn training_history(&self) -> Result<&[f64]> {
        Ok(&self.fitted("training_history")?.history)
    }

    /// Latent codes of standardized rows
    pub fn encode(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self.fitted("encode")?;
        check_same_width(state.autoencoder.input_dim(), features)?;
        Ok(state.autoencoder.encode(features))
    }

    /// Decoder output for standardized rows, in standardized units
    pub fn reconstruct(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self.fitted("reconstruct")?;
        check_same_width(state.autoencoder.input_dim(), features)?;
        Ok(state.autoencoder.reconstruct(features))
    }

    /// Cluster labels of new standardized rows
    pub fn predict(&self, features: &Array2<f64>) -> Result<Array1<usize>> {
        let encoded = self.encode(features)?;
        let state = self.fitted("predict")?;
        Ok(state.kmeans.predict(&encoded))
    }

    /// Mean squared reconstruction error on standardized rows
    pub fn reconstruction_error(&self, features: &Array2<f64>) -> Result<f64> {
        let state = self.fitted("reconstruction_error")?;
        check_same_width(state.autoencoder.input_dim(), features)?;
        Ok(state.autoencoder.reconstruction_error(features))
    }

    /// Latent-space silhouette and reconstruction error on the training rows
    pub fn metrics(&self, data: &FeatureMatrix) -> Result<NeuralMetrics> {
        let state = self.fitted("evaluate")?;
        check_same_rows(state.labels.len(), data)?;
        Ok(NeuralMetrics {
            silhouette_score: metrics::silhouette_score(&state.encoded, &state.labels),
            reconstruction_error: self.reconstruction_error(&data.features)?,
        })
    }

    fn fitted(&self, operation: &'static str) -> Result<&NeuralState> {
        self.state.as_ref().ok_or(SegmentError::NotFitted(operation))
    }

    fn check_parameters(&self, n_features: usize) -> Result<()> {
        if self.encoding_dim == 0 || self.encoding_dim >= n_features {
            return Err(SegmentError::config(format!(
                "encoding_dim ({}) must be between 1 and the number of features ({}) exclusive",
                self.encoding_dim, n_features
            )));
        }
        if self.hidden_layers.contains(&0) {
            return Err(SegmentError::config("hidden layer widths must be > 0"));
        }
        if self.epochs == 0 || self.batch_size == 0 || self.n_init == 0 {
            return Err(SegmentError::config(
                "epochs, batch_size and n_init must be > 0",
            ));
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(SegmentError::config(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

impl Clusterer for NeuralClusterer {
    fn method(&self) -> ClusteringMethod {
        ClusteringMethod::Neural
    }

    fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    fn fit_predict(&mut self, data: &FeatureMatrix) -> Result<ClusterAssignment> {
        let features = &data.features;
        self.check_parameters(features.ncols())?;
        validate_cluster_count(features, self.n_clusters)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut autoencoder = Autoencoder::new(
            features.ncols(),
            &self.hidden_layers,
            self.encoding_dim,
            &mut rng,
        );
        log::info!(
            "Training autoencoder {} -> {:?} -> {} for {} epochs",
            features.ncols(),
            self.hidden_layers,
            self.encoding_dim,
            self.epochs
        );
        let history = autoencoder.fit(
            features,
            self.epochs,
            self.batch_size,
            self.learning_rate,
            &mut rng,
        );
        if let Some(last) = history.last() {
            log::debug!("Final autoencoder loss: {:.6}", last);
        }

        let encoded = autoencoder.encode(features);
        if encoded.iter().any(|v| !v.is_finite()) {
            return Err(SegmentError::NumericDegeneracy(
                "autoencoder produced non-finite latent codes".to_string(),
            ));
        }

        let dataset = DatasetBase::from(encoded.clone());
        let kmeans = KMeans::params_with(self.n_clusters, rng, L2Dist)
            .n_runs(self.n_init)
            .fit(&dataset)?;
        let labels = kmeans.predict(&encoded);

        let centers = member_means(&data.raw_features, &labels, self.n_clusters, &data.scaler);
        self.state = Some(NeuralState {
            autoencoder,
            kmeans,
            encoded,
            labels: labels.clone(),
            centers,
            history,
        });

        Ok(ClusterAssignment {
            labels,
            memberships: None,
        })
    }

    fn cluster_centers(&self) -> Result<Array2<f64>> {
        Ok(self.fitted("cluster_centers")?.centers.clone())
    }

    fn evaluate(&self, data: &FeatureMatrix) -> Result<MethodMetrics> {
        self.metrics(data).map(MethodMetrics::Neural)
    }

    fn generate_profile(&self, data: &FeatureMatrix) -> Result<ClusterProfile> {
        let state = self.fitted("generate_profile")?;
        let quality = self.metrics(data)?;
        let latent_centroids = state.kmeans.centroids();

        let metadata = ProfileMetadata::new(
            ClusteringMethod::Neural,
            self.n_clusters,
            data.n_samples(),
            MethodParameters::Neural(NeuralParameters {
                encoding_dim: self.encoding_dim,
                hidden_layers: self.hidden_layers.clone(),
                epochs: self.epochs,
                batch_size: self.batch_size,
                learning_rate: self.learning_rate,
                random_seed: self.seed,
            }),
        );

        ClusterProfiler::new(data).generate_profile(
            &state.labels,
            &state.centers,
            MethodMetrics::Neural(quality),
            metadata,
            |cluster_id, rows| {
                let centroid = latent_centroids.row(cluster_id);
                let distances: Vec<f64> = rows
                    .iter()
                    .map(|&r| euclidean_distance(&state.encoded.row(r), &centroid))
                    .collect();
                Ok(ClusterExtension::Neural {
                    encoded_space_stats: distance_stats(&distances),
                })
            },
        )
    }
}

/// Mean raw row per label; labels without members fall back to the data mean
fn member_means(
    raw: &Array2<f64>,
    labels: &Array1<usize>,
    n_clusters: usize,
    scaler: &ScalerState,
) -> Array2<f64> {
    let centroids = metrics::label_centroids(raw, labels);
    let mut centers = Array2::zeros((n_clusters, raw.ncols()));
    for (k, mut row) in centers.outer_iter_mut().enumerate() {
        match centroids.get(k) {
            Some(Some(mean)) => row.assign(mean),
            _ => row.assign(&scaler.mean),
        }
    }
    centers
}

fn distance_stats(distances: &[f64]) -> DistanceStats {
    let n = distances.len().max(1) as f64;
    let mean = distances.iter().sum::<f64>() / n;
    let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    DistanceStats {
        mean_distance: mean,
        std_distance: variance.sqrt(),
        max_distance: distances.iter().cloned().fold(0.0, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::blobs;
    use ndarray::Axis;

    fn four_dim_blobs() -> FeatureMatrix {
        blobs(
            &[&[0.0, 0.0, 0.0, 0.0], &[10.0, 10.0, 10.0, 10.0]],
            40,
            0.5,
            13,
        )
    }

    fn small_model() -> NeuralClusterer {
        NeuralClusterer::new(2)
            .with_encoding_dim(2)
            .with_hidden_layers(vec![8])
            .with_epochs(30)
            .with_batch_size(16)
            .with_learning_rate(5e-3)
            .with_n_init(3)
            .with_seed(3)
    }

    #[test]
    fn test_separates_distant_blobs() {
        let data = four_dim_blobs();
        let mut model = small_model();
        let assignment = model.fit_predict(&data).unwrap();

        let first = assignment.labels[0];
        assert!(assignment.labels.iter().take(40).all(|&l| l == first));
        assert!(assignment.labels.iter().skip(40).all(|&l| l != first));
        assert!(assignment.memberships.is_none());
        assert_eq!(model.training_history().unwrap().len(), 30);
    }

    #[test]
    fn test_centers_are_member_means() {
        let data = four_dim_blobs();
        let mut model = small_model();
        let assignment = model.fit_predict(&data).unwrap();
        let centers = model.cluster_centers().unwrap();

        let expected = data
            .raw_features
            .select(Axis(0), &(0..40).collect::<Vec<_>>())
            .mean_axis(Axis(0))
            .unwrap();
        let row = centers.row(assignment.labels[0]);
        for (a, b) in row.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_longer_training_does_not_increase_reconstruction_error() {
        let data = four_dim_blobs();
        let mut short = small_model().with_epochs(1);
        let mut long = small_model().with_epochs(100);
        short.fit_predict(&data).unwrap();
        long.fit_predict(&data).unwrap();

        let short_error = short.reconstruction_error(&data.features).unwrap();
        let long_error = long.reconstruction_error(&data.features).unwrap();
        assert!(long_error <= short_error, "{long_error} > {short_error}");
    }

    #[test]
    fn test_fit_is_deterministic_under_seed() {
        let data = four_dim_blobs();
        let mut a = small_model();
        let mut b = small_model();
        let la = a.fit_predict(&data).unwrap().labels;
        let lb = b.fit_predict(&data).unwrap().labels;
        assert_eq!(la, lb);
        assert_eq!(a.training_history().unwrap(), b.training_history().unwrap());
        assert_eq!(a.cluster_centers().unwrap(), b.cluster_centers().unwrap());
    }

    #[test]
    fn test_encoding_dim_must_compress() {
        let data = four_dim_blobs();
        let mut model = small_model().with_encoding_dim(4);
        assert!(model.fit_predict(&data).unwrap_err().is_configuration());
    }

    #[test]
    fn test_predict_and_profile() {
        let data = four_dim_blobs();
        let mut model = small_model();
        let assignment = model.fit_predict(&data).unwrap();

        let predicted = model.predict(&data.features).unwrap();
        assert_eq!(predicted, assignment.labels);

        let profile = model.generate_profile(&data).unwrap();
        assert_eq!(profile.clusters.len(), 2);
        for cluster in profile.clusters.values() {
            match &cluster.extension {
                ClusterExtension::Neural { encoded_space_stats } => {
                    assert!(encoded_space_stats.max_distance >= encoded_space_stats.mean_distance);
                }
                other => panic!("unexpected extension {other:?}"),
            }
        }
        match profile.metrics {
            MethodMetrics::Neural(m) => assert!(m.reconstruction_error >= 0.0),
            other => panic!("unexpected metrics {other:?}"),
        }
    }

    #[test]
    fn test_not_fitted() {
        let model = small_model();
        assert!(matches!(
            model.encode(&Array2::zeros((1, 4))),
            Err(SegmentError::NotFitted(_))
        ));
    }
}
