//! Fuzzy C-Means clustering
//!
//! Every customer receives a membership degree in each cluster instead of a
//! single assignment. With fuzziness `m` the objective is
//!
//! ```text
//! J = Σᵢ Σₖ uᵢₖᵐ ‖xᵢ − cₖ‖²
//! ```
//!
//! minimized by alternating center and membership updates until the
//! Frobenius norm of the membership change drops below `tolerance`.

use crate::config::FuzzyConfig;
use crate::data::{FeatureMatrix, ScalerState};
use crate::error::{Result, SegmentError};
use crate::metrics::{self, euclidean_distance};
use crate::model::{
    check_same_rows, check_same_width, validate_cluster_count, ClusterAssignment, Clusterer,
    ClusteringMethod,
};
use crate::profile::{
    soft_score_stats, ClusterExtension, ClusterProfile, ClusterProfiler, FuzzyMetrics,
    FuzzyParameters, MethodMetrics, MethodParameters, ProfileMetadata,
};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Distance under which a point is treated as sitting on a center
const COINCIDENT_EPS: f64 = 1e-12;

/// Fuzzy c-means clusterer
#[derive(Debug, Clone)]
pub struct FuzzyClusterer {
    n_clusters: usize,
    m: f64,
    max_iterations: usize,
    tolerance: f64,
    seed: u64,
    state: Option<FuzzyState>,
}

#[derive(Debug, Clone)]
struct FuzzyState {
    /// Centers in standardized space (n_clusters, n_features)
    centers: Array2<f64>,
    /// Memberships of the training rows (n_samples, n_clusters)
    memberships: Array2<f64>,
    scaler: ScalerState,
    converged: bool,
    n_iterations: usize,
}

impl FuzzyClusterer {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            m: 2.0,
            max_iterations: 150,
            tolerance: 0.005,
            seed: 42,
            state: None,
        }
    }

    pub fn from_config(config: &FuzzyConfig) -> Self {
        Self::new(config.n_clusters)
            .with_fuzziness(config.fuzziness_parameter)
            .with_max_iterations(config.max_iterations)
            .with_tolerance(config.tolerance)
            .with_seed(config.random_seed)
    }

    /// Set the fuzziness exponent (must be > 1)
    pub fn with_fuzziness(mut self, m: f64) -> Self {
        self.m = m;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Membership matrix of the training rows
    pub fn memberships(&self) -> Result<&Array2<f64>> {
        Ok(&self.fitted("memberships")?.memberships)
    }

    /// Whether the last fit met the tolerance before `max_iterations`
    pub fn converged(&self) -> Result<bool> {
        Ok(self.fitted("converged")?.converged)
    }

    pub fn n_iterations(&self) -> Result<usize> {
        Ok(self.fitted("n_iterations")?.n_iterations)
    }

    /// Assign new standardized rows against the fitted centers
    pub fn predict(&self, features: &Array2<f64>) -> Result<(Array1<usize>, Array2<f64>)> {
        let state = self.fitted("predict")?;
        check_same_width(state.centers.ncols(), features)?;
        let memberships = update_memberships(features, &state.centers, self.m);
        let labels = metrics::labels_from_memberships(&memberships);
        Ok((labels, memberships))
    }

    /// Silhouette, partition coefficient and partition entropy on the training rows
    pub fn metrics(&self, data: &FeatureMatrix) -> Result<FuzzyMetrics> {
        let state = self.fitted("evaluate")?;
        check_same_rows(state.memberships.nrows(), data)?;
        let labels = metrics::labels_from_memberships(&state.memberships);
        Ok(FuzzyMetrics {
            silhouette_score: metrics::silhouette_score(&data.features, &labels),
            partition_coefficient: metrics::partition_coefficient(&state.memberships),
            partition_entropy: metrics::partition_entropy(&state.memberships),
            converged: state.converged,
            n_iterations: state.n_iterations,
        })
    }

    fn fitted(&self, operation: &'static str) -> Result<&FuzzyState> {
        self.state.as_ref().ok_or(SegmentError::NotFitted(operation))
    }

    fn check_parameters(&self) -> Result<()> {
        if self.m <= 1.0 || !self.m.is_finite() {
            return Err(SegmentError::config(format!(
                "fuzziness parameter m must be > 1.0, got {}",
                self.m
            )));
        }
        if self.max_iterations == 0 {
            return Err(SegmentError::config("max_iterations must be > 0"));
        }
        Ok(())
    }
}

impl Clusterer for FuzzyClusterer {
    fn method(&self) -> ClusteringMethod {
        ClusteringMethod::Fuzzy
    }

    fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    fn fit_predict(&mut self, data: &FeatureMatrix) -> Result<ClusterAssignment> {
        self.check_parameters()?;
        let features = &data.features;
        validate_cluster_count(features, self.n_clusters)?;

        let n_samples = features.nrows();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut memberships =
            Array2::from_shape_fn((n_samples, self.n_clusters), |_| rng.gen::<f64>() + 1e-9);
        normalize_rows(&mut memberships);

        let mut centers = Array2::zeros((self.n_clusters, features.ncols()));
        let mut converged = false;
        let mut n_iterations = 0;

        for iteration in 1..=self.max_iterations {
            centers = weighted_centers(features, &memberships, self.m);
            let updated = update_memberships(features, &centers, self.m);
            let change = (&updated - &memberships)
                .iter()
                .map(|d| d * d)
                .sum::<f64>()
                .sqrt();
            memberships = updated;
            n_iterations = iteration;
            if change < self.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            log::debug!("Fuzzy c-means converged after {} iterations", n_iterations);
        } else {
            log::warn!(
                "Fuzzy c-means did not converge within {} iterations",
                self.max_iterations
            );
        }

        let labels = metrics::labels_from_memberships(&memberships);
        self.state = Some(FuzzyState {
            centers,
            memberships: memberships.clone(),
            scaler: data.scaler.clone(),
            converged,
            n_iterations,
        });

        Ok(ClusterAssignment {
            labels,
            memberships: Some(memberships),
        })
    }

    fn cluster_centers(&self) -> Result<Array2<f64>> {
        let state = self.fitted("cluster_centers")?;
        state.scaler.inverse_transform(&state.centers)
    }

    fn evaluate(&self, data: &FeatureMatrix) -> Result<MethodMetrics> {
        self.metrics(data).map(MethodMetrics::Fuzzy)
    }

    fn generate_profile(&self, data: &FeatureMatrix) -> Result<ClusterProfile> {
        let state = self.fitted("generate_profile")?;
        let quality = self.metrics(data)?;
        let labels = metrics::labels_from_memberships(&state.memberships);
        let centers = self.cluster_centers()?;

        let metadata = ProfileMetadata::new(
            ClusteringMethod::Fuzzy,
            self.n_clusters,
            data.n_samples(),
            MethodParameters::Fuzzy(FuzzyParameters {
                fuzziness_parameter: self.m,
                max_iterations: self.max_iterations,
                tolerance: self.tolerance,
                random_seed: self.seed,
            }),
        );

        ClusterProfiler::new(data).generate_profile(
            &labels,
            &centers,
            MethodMetrics::Fuzzy(quality),
            metadata,
            |cluster_id, rows| {
                Ok(ClusterExtension::Fuzzy {
                    membership_stats: soft_score_stats(&state.memberships, cluster_id, rows),
                })
            },
        )
    }
}

/// Fuzziness-weighted mean of all points per cluster
fn weighted_centers(features: &Array2<f64>, memberships: &Array2<f64>, m: f64) -> Array2<f64> {
    let weights = memberships.mapv(|u| u.powf(m));
    let totals = weights.sum_axis(Axis(0)).insert_axis(Axis(1));
    weights.t().dot(features) / &totals
}

/// Membership of each point to each center, rows summing to 1
fn update_memberships(features: &Array2<f64>, centers: &Array2<f64>, m: f64) -> Array2<f64> {
    let exponent = 2.0 / (m - 1.0);
    let n_clusters = centers.nrows();
    let mut memberships = Array2::zeros((features.nrows(), n_clusters));

    for (point, mut row) in features.outer_iter().zip(memberships.outer_iter_mut()) {
        let distances: Vec<f64> = centers
            .outer_iter()
            .map(|center| euclidean_distance(&point, &center))
            .collect();

        if let Some(hit) = distances.iter().position(|&d| d < COINCIDENT_EPS) {
            row[hit] = 1.0;
            continue;
        }

        // Scale by the nearest distance so large exponents stay finite
        let nearest = distances.iter().cloned().fold(f64::INFINITY, f64::min);
        for (k, &d) in distances.iter().enumerate() {
            row[k] = (nearest / d).powf(exponent);
        }
        let total = row.sum();
        row /= total;
    }
    memberships
}

fn normalize_rows(matrix: &mut Array2<f64>) {
    for mut row in matrix.outer_iter_mut() {
        let total = row.sum();
        row /= total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::blobs;
    use ndarray::array;

    #[test]
    fn test_fuzzy_well_separated_blobs() {
        let data = blobs(&[&[0.0, 0.0], &[20.0, 20.0]], 50, 0.5, 7);
        let mut model = FuzzyClusterer::new(2).with_seed(42);
        let assignment = model.fit_predict(&data).unwrap();

        let metrics = model.metrics(&data).unwrap();
        assert!(metrics.silhouette_score > 0.9, "{metrics:?}");
        assert!(metrics.partition_coefficient > 0.9, "{metrics:?}");
        assert!(metrics.converged);

        // First blob shares a label, second blob the other
        assert!(assignment.labels.iter().take(50).all(|&l| l == assignment.labels[0]));
        assert!(assignment.labels.iter().skip(50).all(|&l| l != assignment.labels[0]));
    }

    #[test]
    fn test_memberships_sum_to_one_and_match_labels() {
        let data = blobs(&[&[0.0, 0.0], &[5.0, 5.0], &[0.0, 6.0]], 30, 1.5, 3);
        let mut model = FuzzyClusterer::new(3).with_seed(1);
        let assignment = model.fit_predict(&data).unwrap();
        let memberships = assignment.memberships.unwrap();

        for (row, &label) in memberships.outer_iter().zip(assignment.labels.iter()) {
            assert!((row.sum() - 1.0).abs() < 1e-6);
            assert_eq!(metrics::argmax(&row), label);
        }
    }

    #[test]
    fn test_fit_is_deterministic_under_seed() {
        let data = blobs(&[&[0.0, 0.0], &[4.0, 4.0]], 25, 1.0, 11);
        let mut first = FuzzyClusterer::new(2).with_seed(5);
        let mut second = FuzzyClusterer::new(2).with_seed(5);
        let a = first.fit_predict(&data).unwrap();
        let b = second.fit_predict(&data).unwrap();
        assert_eq!(a.labels, b.labels);

        let ca = first.cluster_centers().unwrap();
        let cb = second.cluster_centers().unwrap();
        for (x, y) in ca.iter().zip(cb.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_centers_in_original_units() {
        let data = blobs(&[&[100.0, -50.0], &[200.0, 50.0]], 40, 0.1, 2);
        let mut model = FuzzyClusterer::new(2);
        model.fit_predict(&data).unwrap();
        let centers = model.cluster_centers().unwrap();

        let mut firsts: Vec<f64> = centers.column(0).to_vec();
        firsts.sort_by(f64::total_cmp);
        assert!((firsts[0] - 100.0).abs() < 1.0, "{centers:?}");
        assert!((firsts[1] - 200.0).abs() < 1.0, "{centers:?}");
    }

    #[test]
    fn test_coincident_point_gets_full_membership() {
        let centers = array![[0.0, 0.0], [1.0, 1.0]];
        let features = array![[1.0, 1.0], [0.5, 0.5]];
        let memberships = update_memberships(&features, &centers, 2.0);
        assert_eq!(memberships.row(0).to_vec(), vec![0.0, 1.0]);
        // Equidistant point splits evenly and breaks the tie toward cluster 0
        assert!((memberships[[1, 0]] - 0.5).abs() < 1e-12);
        assert_eq!(metrics::labels_from_memberships(&memberships)[1], 0);
    }

    #[test]
    fn test_non_convergence_is_reported() {
        let data = blobs(&[&[0.0, 0.0], &[1.0, 1.0]], 30, 1.0, 4);
        let mut model = FuzzyClusterer::new(2).with_max_iterations(1).with_tolerance(0.0);
        let assignment = model.fit_predict(&data).unwrap();
        assert_eq!(assignment.labels.len(), 60);
        assert!(!model.converged().unwrap());
        assert_eq!(model.n_iterations().unwrap(), 1);
    }

    #[test]
    fn test_configuration_errors() {
        let data = blobs(&[&[0.0, 0.0]], 3, 1.0, 1);
        let mut model = FuzzyClusterer::new(4);
        assert!(model.fit_predict(&data).unwrap_err().is_configuration());

        let mut model = FuzzyClusterer::new(2).with_fuzziness(1.0);
        assert!(model.fit_predict(&data).unwrap_err().is_configuration());

        let model = FuzzyClusterer::new(2);
        assert!(matches!(
            model.cluster_centers(),
            Err(SegmentError::NotFitted(_))
        ));
    }

    #[test]
    fn test_predict_new_rows() {
        let data = blobs(&[&[0.0, 0.0], &[20.0, 20.0]], 20, 0.5, 9);
        let mut model = FuzzyClusterer::new(2);
        let assignment = model.fit_predict(&data).unwrap();

        let rows = data.features.select(Axis(0), &[0, 39]);
        let (labels, memberships) = model.predict(&rows).unwrap();
        assert_eq!(labels[0], assignment.labels[0]);
        assert_eq!(labels[1], assignment.labels[39]);
        assert_eq!(memberships.dim(), (2, 2));
        assert!(model.predict(&Array2::zeros((1, 3))).is_err());
    }
}
