//! Gaussian Mixture Model clustering
//!
//! The data is modelled as
//!
//! ```text
//! P(x) = Σₖ πₖ × N(x | μₖ, Σₖ)
//! ```
//!
//! and fitted with Expectation-Maximization:
//!
//! - **E-step**: responsibilities `γₙₖ = πₖ N(xₙ | μₖ, Σₖ) / Σⱼ πⱼ N(xₙ | μⱼ, Σⱼ)`
//! - **M-step**: weighted means, covariances and `πₖ = (1/N) Σₙ γₙₖ`
//!
//! Each restart is seeded from a k-means partition. `reg_covar` is added to
//! every covariance diagonal; a covariance that still fails Cholesky
//! factorization is reported as [`SegmentError::NumericDegeneracy`].

use crate::config::{CovarianceType, GmmConfig};
use crate::data::{FeatureMatrix, ScalerState};
use crate::error::{Result, SegmentError};
use crate::metrics::{self, row_entropy};
use crate::model::{
    check_same_width, validate_cluster_count, ClusterAssignment, Clusterer, ClusteringMethod,
};
use crate::profile::{
    soft_score_stats, ClusterExtension, ClusterProfile, ClusterProfiler, CovarianceInfo,
    GmmMetrics, GmmParameters, MethodMetrics, MethodParameters, ProfileMetadata,
    UncertaintyMetrics,
};
use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Rows whose top probability exceeds this are confidently assigned
const HIGH_CONFIDENCE: f64 = 0.9;
/// Rows whose top probability is below this are ambiguous
const LOW_CONFIDENCE: f64 = 0.7;

/// Fitted covariance parameters, shaped by covariance type
#[derive(Debug, Clone, PartialEq)]
pub enum Covariances {
    /// (n_clusters, n_features, n_features)
    Full(Array3<f64>),
    /// (n_features, n_features), shared by all components
    Tied(Array2<f64>),
    /// (n_clusters, n_features)
    Diag(Array2<f64>),
    /// (n_clusters,)
    Spherical(Array1<f64>),
}

impl Covariances {
    pub fn covariance_type(&self) -> CovarianceType {
        match self {
            Covariances::Full(_) => CovarianceType::Full,
            Covariances::Tied(_) => CovarianceType::Tied,
            Covariances::Diag(_) => CovarianceType::Diag,
            Covariances::Spherical(_) => CovarianceType::Spherical,
        }
    }

    /// Full (n_features, n_features) matrix of component `k`
    pub fn component_matrix(&self, k: usize, n_features: usize) -> Array2<f64> {
        match self {
            Covariances::Full(all) => all.index_axis(Axis(0), k).to_owned(),
            Covariances::Tied(shared) => shared.clone(),
            Covariances::Diag(diag) => Array2::from_diag(&diag.row(k)),
            Covariances::Spherical(variances) => Array2::eye(n_features) * variances[k],
        }
    }

    /// Per-feature variances of component `k`
    pub fn component_diagonal(&self, k: usize, n_features: usize) -> Array1<f64> {
        match self {
            Covariances::Full(all) => all.index_axis(Axis(0), k).diag().to_owned(),
            Covariances::Tied(shared) => shared.diag().to_owned(),
            Covariances::Diag(diag) => diag.row(k).to_owned(),
            Covariances::Spherical(variances) => Array1::from_elem(n_features, variances[k]),
        }
    }

    /// M-step covariance estimate from responsibilities
    fn estimate(
        features: &Array2<f64>,
        resp: &Array2<f64>,
        nk: &Array1<f64>,
        means: &Array2<f64>,
        covariance_type: CovarianceType,
        reg_covar: f64,
    ) -> Self {
        let n_features = features.ncols();
        let n_clusters = means.nrows();
        let regularizer = Array2::<f64>::eye(n_features) * reg_covar;

        let scatter = |k: usize| -> Array2<f64> {
            let diff = features - &means.row(k);
            let weighted = &diff * &resp.column(k).insert_axis(Axis(1));
            weighted.t().dot(&diff)
        };

        match covariance_type {
            CovarianceType::Full => {
                let mut all = Array3::zeros((n_clusters, n_features, n_features));
                for k in 0..n_clusters {
                    let cov = scatter(k) / nk[k] + &regularizer;
                    all.index_axis_mut(Axis(0), k).assign(&cov);
                }
                Covariances::Full(all)
            }
            CovarianceType::Tied => {
                let mut shared = Array2::zeros((n_features, n_features));
                for k in 0..n_clusters {
                    shared += &scatter(k);
                }
                Covariances::Tied(shared / nk.sum() + &regularizer)
            }
            CovarianceType::Diag | CovarianceType::Spherical => {
                let mut diag = Array2::zeros((n_clusters, n_features));
                for k in 0..n_clusters {
                    let squared = (features - &means.row(k)).mapv(|v| v * v);
                    let variances = resp.column(k).dot(&squared) / nk[k] + reg_covar;
                    diag.row_mut(k).assign(&variances);
                }
                if covariance_type == CovarianceType::Diag {
                    Covariances::Diag(diag)
                } else {
                    Covariances::Spherical(diag.mean_axis(Axis(1)).unwrap_or_else(|| {
                        Array1::from_elem(n_clusters, reg_covar)
                    }))
                }
            }
        }
    }
}

/// One Gaussian component prepared for density evaluation
#[derive(Debug, Clone)]
struct Component {
    mean: Array1<f64>,
    /// Lower-triangular factor of the covariance
    cholesky: Array2<f64>,
    log_det: f64,
}

impl Component {
    fn log_density(&self, point: &ndarray::ArrayView1<f64>) -> f64 {
        let d = self.mean.len();
        let diff = point - &self.mean;
        let solved = forward_substitute(&self.cholesky, &diff);
        let mahalanobis = solved.iter().map(|v| v * v).sum::<f64>();
        -0.5 * (d as f64 * (2.0 * PI).ln() + self.log_det + mahalanobis)
    }
}

/// Mixture parameters after an M-step
#[derive(Debug, Clone)]
struct Mixture {
    weights: Array1<f64>,
    means: Array2<f64>,
    covariances: Covariances,
    components: Vec<Component>,
}

impl Mixture {
    fn estimate(
        features: &Array2<f64>,
        resp: &Array2<f64>,
        covariance_type: CovarianceType,
        reg_covar: f64,
    ) -> Result<Self> {
        let n_samples = features.nrows() as f64;
        let nk = resp.sum_axis(Axis(0)) + 10.0 * f64::EPSILON;
        let means = resp.t().dot(features) / &nk.view().insert_axis(Axis(1));
        let covariances =
            Covariances::estimate(features, resp, &nk, &means, covariance_type, reg_covar);

        let n_features = features.ncols();
        let components = (0..means.nrows())
            .map(|k| {
                let matrix = covariances.component_matrix(k, n_features);
                let factor = cholesky(&matrix).ok_or_else(|| {
                    SegmentError::NumericDegeneracy(format!(
                        "covariance of component {k} is not positive definite; \
                         increase reg_covar or reduce n_clusters"
                    ))
                })?;
                let log_det = 2.0 * factor.diag().iter().map(|v| v.ln()).sum::<f64>();
                Ok(Component {
                    mean: means.row(k).to_owned(),
                    cholesky: factor,
                    log_det,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            weights: nk / n_samples,
            means,
            covariances,
            components,
        })
    }

    /// `ln πₖ + ln N(xₙ | μₖ, Σₖ)`, shape (n_samples, n_clusters)
    fn weighted_log_prob(&self, features: &Array2<f64>) -> Array2<f64> {
        let mut log_prob = Array2::zeros((features.nrows(), self.components.len()));
        for (point, mut row) in features.outer_iter().zip(log_prob.outer_iter_mut()) {
            for (k, component) in self.components.iter().enumerate() {
                row[k] = self.weights[k].ln() + component.log_density(&point);
            }
        }
        log_prob
    }

    /// Mean per-sample log-likelihood and log responsibilities
    fn e_step(&self, features: &Array2<f64>) -> (f64, Array2<f64>) {
        let mut log_resp = self.weighted_log_prob(features);
        let mut total = 0.0;
        for mut row in log_resp.outer_iter_mut() {
            let norm = log_sum_exp(&row.view());
            total += norm;
            row -= norm;
        }
        (total / features.nrows().max(1) as f64, log_resp)
    }
}

/// Result of one EM restart
struct Run {
    mixture: Mixture,
    lower_bound: f64,
    converged: bool,
    n_iterations: usize,
}

/// Gaussian mixture clusterer
#[derive(Debug, Clone)]
pub struct GmmClusterer {
    n_clusters: usize,
    covariance_type: CovarianceType,
    max_iter: usize,
    n_init: usize,
    tolerance: f64,
    reg_covar: f64,
    seed: u64,
    state: Option<GmmState>,
}

#[derive(Debug, Clone)]
struct GmmState {
    mixture: Mixture,
    scaler: ScalerState,
    converged: bool,
    n_iterations: usize,
}

impl GmmClusterer {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            covariance_type: CovarianceType::Full,
            max_iter: 200,
            n_init: 10,
            tolerance: 1e-3,
            reg_covar: 1e-6,
            seed: 42,
            state: None,
        }
    }

    pub fn from_config(config: &GmmConfig) -> Self {
        Self::new(config.n_clusters)
            .with_covariance_type(config.covariance_type)
            .with_max_iter(config.max_iter)
            .with_n_init(config.n_init)
            .with_tolerance(config.tolerance)
            .with_reg_covar(config.reg_covar)
            .with_seed(config.random_seed)
    }

    pub fn with_covariance_type(mut self, covariance_type: CovarianceType) -> Self {
        self.covariance_type = covariance_type;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Number of EM restarts; the best lower bound wins
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Non-negative floor added to covariance diagonals
    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fit the mixture on the standardized matrix
    ///
    /// # Arguments
    /// * `data` - Feature matrix; EM runs on its standardized values
    ///
    /// # Returns
    /// * `Ok(())` once the best of `n_init` restarts is stored. Running out of
    ///   iterations is not an error; check [`GmmClusterer::converged`].
    pub fn fit(&mut self, data: &FeatureMatrix) -> Result<()> {
        self.check_parameters()?;
        let features = &data.features;
        validate_cluster_count(features, self.n_clusters)?;

        let mut seeds = StdRng::seed_from_u64(self.seed);
        let mut best: Option<Run> = None;
        for init in 0..self.n_init {
            let run = self.fit_once(features, seeds.gen())?;
            log::debug!(
                "GMM restart {}/{}: lower bound {:.6} after {} iterations",
                init + 1,
                self.n_init,
                run.lower_bound,
                run.n_iterations
            );
            if best
                .as_ref()
                .map_or(true, |b| run.lower_bound > b.lower_bound)
            {
                best = Some(run);
            }
        }

        let best = best.ok_or_else(|| SegmentError::config("n_init must be > 0"))?;
        if !best.converged {
            log::warn!(
                "GMM did not converge within {} iterations; try a larger max_iter or tolerance",
                self.max_iter
            );
        }
        self.state = Some(GmmState {
            mixture: best.mixture,
            scaler: data.scaler.clone(),
            converged: best.converged,
            n_iterations: best.n_iterations,
        });
        Ok(())
    }

    /// Hard labels of standardized rows
    pub fn predict(&self, features: &Array2<f64>) -> Result<Array1<usize>> {
        Ok(metrics::labels_from_memberships(&self.predict_proba(features)?))
    }

    /// Posterior component probabilities (n_samples, n_clusters), rows sum to 1
    pub fn predict_proba(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self.fitted("predict_proba")?;
        check_same_width(state.mixture.means.ncols(), features)?;
        let (_, log_resp) = state.mixture.e_step(features);
        Ok(log_resp.mapv(f64::exp))
    }

    /// Covariance parameters in standardized units
    pub fn get_covariances(&self) -> Result<&Covariances> {
        Ok(&self.fitted("get_covariances")?.mixture.covariances)
    }

    /// Mixture weights, summing to 1
    pub fn get_weights(&self) -> Result<&Array1<f64>> {
        Ok(&self.fitted("get_weights")?.mixture.weights)
    }

    pub fn converged(&self) -> Result<bool> {
        Ok(self.fitted("converged")?.converged)
    }

    pub fn n_iterations(&self) -> Result<usize> {
        Ok(self.fitted("n_iterations")?.n_iterations)
    }

    /// Mean per-sample log-likelihood
    pub fn score(&self, features: &Array2<f64>) -> Result<f64> {
        let state = self.fitted("score")?;
        check_same_width(state.mixture.means.ncols(), features)?;
        Ok(state.mixture.e_step(features).0)
    }

    /// Bayesian information criterion; lower is better
    pub fn bic(&self, features: &Array2<f64>) -> Result<f64> {
        let n = features.nrows() as f64;
        let log_likelihood = self.score(features)? * n;
        Ok(-2.0 * log_likelihood + self.n_parameters(features.ncols()) as f64 * n.ln())
    }

    /// Akaike information criterion; lower is better
    pub fn aic(&self, features: &Array2<f64>) -> Result<f64> {
        let n = features.nrows() as f64;
        let log_likelihood = self.score(features)? * n;
        Ok(-2.0 * log_likelihood + 2.0 * self.n_parameters(features.ncols()) as f64)
    }

    /// Free parameters of the mixture: covariances, means and k-1 weights
    pub fn n_parameters(&self, n_features: usize) -> usize {
        let k = self.n_clusters;
        let d = n_features;
        let covariance = match self.covariance_type {
            CovarianceType::Full => k * d * (d + 1) / 2,
            CovarianceType::Tied => d * (d + 1) / 2,
            CovarianceType::Diag => k * d,
            CovarianceType::Spherical => k,
        };
        covariance + k * d + k - 1
    }

    /// Full quality report on standardized rows
    pub fn metrics(&self, data: &FeatureMatrix) -> Result<GmmMetrics> {
        let state = self.fitted("evaluate")?;
        let features = &data.features;
        let labels = self.predict(features)?;
        Ok(GmmMetrics {
            silhouette_score: metrics::silhouette_score(features, &labels),
            bic: self.bic(features)?,
            aic: self.aic(features)?,
            davies_bouldin_index: metrics::davies_bouldin_index(features, &labels),
            calinski_harabasz_score: metrics::calinski_harabasz_score(features, &labels),
            log_likelihood: self.score(features)? * features.nrows() as f64,
            converged: state.converged,
            n_iterations: state.n_iterations,
        })
    }

    /// Confidence of the soft assignments of standardized rows
    pub fn uncertainty_metrics(&self, features: &Array2<f64>) -> Result<UncertaintyMetrics> {
        Ok(uncertainty_from_probabilities(&self.predict_proba(features)?))
    }

    fn fit_once(&self, features: &Array2<f64>, init_seed: u64) -> Result<Run> {
        let (n_samples, _) = features.dim();
        let dataset = DatasetBase::from(features.clone());
        let kmeans = KMeans::params_with(self.n_clusters, StdRng::seed_from_u64(init_seed), L2Dist)
            .n_runs(1)
            .fit(&dataset)?;
        let initial_labels = kmeans.predict(features);

        let mut resp = Array2::zeros((n_samples, self.n_clusters));
        for (row, &label) in initial_labels.iter().enumerate() {
            resp[[row, label]] = 1.0;
        }
        let mut mixture =
            Mixture::estimate(features, &resp, self.covariance_type, self.reg_covar)?;

        let mut lower_bound = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iterations = 0;
        for iteration in 1..=self.max_iter {
            let previous = lower_bound;
            let (log_norm, log_resp) = mixture.e_step(features);
            if !log_norm.is_finite() {
                return Err(SegmentError::NumericDegeneracy(format!(
                    "log-likelihood became {log_norm} at EM iteration {iteration}"
                )));
            }
            lower_bound = log_norm;
            mixture = Mixture::estimate(
                features,
                &log_resp.mapv(f64::exp),
                self.covariance_type,
                self.reg_covar,
            )?;
            n_iterations = iteration;
            if (lower_bound - previous).abs() < self.tolerance {
                converged = true;
                break;
            }
        }

        Ok(Run {
            mixture,
            lower_bound,
            converged,
            n_iterations,
        })
    }

    fn fitted(&self, operation: &'static str) -> Result<&GmmState> {
        self.state.as_ref().ok_or(SegmentError::NotFitted(operation))
    }

    fn check_parameters(&self) -> Result<()> {
        if self.n_init == 0 || self.max_iter == 0 {
            return Err(SegmentError::config("n_init and max_iter must be > 0"));
        }
        if self.reg_covar < 0.0 || !self.reg_covar.is_finite() {
            return Err(SegmentError::config(format!(
                "reg_covar must be >= 0, got {}",
                self.reg_covar
            )));
        }
        if self.tolerance < 0.0 || !self.tolerance.is_finite() {
            return Err(SegmentError::config(format!(
                "tolerance must be >= 0, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

impl Clusterer for GmmClusterer {
    fn method(&self) -> ClusteringMethod {
        ClusteringMethod::Gmm
    }

    fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    fn fit_predict(&mut self, data: &FeatureMatrix) -> Result<ClusterAssignment> {
        self.fit(data)?;
        let probabilities = self.predict_proba(&data.features)?;
        Ok(ClusterAssignment {
            labels: metrics::labels_from_memberships(&probabilities),
            memberships: Some(probabilities),
        })
    }

    fn cluster_centers(&self) -> Result<Array2<f64>> {
        let state = self.fitted("cluster_centers")?;
        state.scaler.inverse_transform(&state.mixture.means)
    }

    fn evaluate(&self, data: &FeatureMatrix) -> Result<MethodMetrics> {
        self.metrics(data).map(MethodMetrics::Gmm)
    }

    fn generate_profile(&self, data: &FeatureMatrix) -> Result<ClusterProfile> {
        let state = self.fitted("generate_profile")?;
        let probabilities = self.predict_proba(&data.features)?;
        let labels = metrics::labels_from_memberships(&probabilities);
        let quality = self.metrics(data)?;
        let centers = self.cluster_centers()?;
        let n_features = data.n_features();
        let mixture = &state.mixture;

        let metadata = ProfileMetadata::new(
            ClusteringMethod::Gmm,
            self.n_clusters,
            data.n_samples(),
            MethodParameters::Gmm(GmmParameters {
                covariance_type: self.covariance_type,
                max_iterations: self.max_iter,
                n_initializations: self.n_init,
                tolerance: self.tolerance,
                reg_covar: self.reg_covar,
                random_seed: self.seed,
                converged: state.converged,
                n_iterations: state.n_iterations,
            }),
        );

        let mut profile = ClusterProfiler::new(data).generate_profile(
            &labels,
            &centers,
            MethodMetrics::Gmm(quality),
            metadata,
            |cluster_id, rows| {
                let covariance_info = match &mixture.covariances {
                    Covariances::Spherical(variances) => CovarianceInfo {
                        covariance_type: CovarianceType::Spherical,
                        feature_variances: None,
                        variance: Some(variances[cluster_id]),
                    },
                    covariances => {
                        let diagonal = covariances.component_diagonal(cluster_id, n_features);
                        CovarianceInfo {
                            covariance_type: covariances.covariance_type(),
                            feature_variances: Some(
                                data.columns.iter().cloned().zip(diagonal.iter().cloned()).collect(),
                            ),
                            variance: None,
                        }
                    }
                };
                Ok(ClusterExtension::Gmm {
                    mixture_weight: mixture.weights[cluster_id],
                    probability_stats: soft_score_stats(&probabilities, cluster_id, rows),
                    covariance_info,
                })
            },
        )?;

        profile.uncertainty_metrics = Some(uncertainty_from_probabilities(&probabilities));
        profile.mixture_weights = Some(mixture.weights.to_vec());
        Ok(profile)
    }
}

/// Confidence summary of a probability matrix
pub fn uncertainty_from_probabilities(probabilities: &Array2<f64>) -> UncertaintyMetrics {
    let n = probabilities.nrows();
    let total = n.max(1) as f64;
    let max_probabilities: Vec<f64> = probabilities
        .outer_iter()
        .map(|row| row.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
        .collect();
    let entropies: Vec<f64> = probabilities.outer_iter().map(|row| row_entropy(&row)).collect();

    let avg_max = max_probabilities.iter().sum::<f64>() / total;
    let std_max = (max_probabilities
        .iter()
        .map(|p| (p - avg_max).powi(2))
        .sum::<f64>()
        / total)
        .sqrt();
    let high = max_probabilities.iter().filter(|&&p| p > HIGH_CONFIDENCE).count();
    let low = max_probabilities.iter().filter(|&&p| p < LOW_CONFIDENCE).count();

    UncertaintyMetrics {
        avg_max_probability: avg_max,
        std_max_probability: std_max,
        high_confidence_count: high,
        high_confidence_pct: high as f64 / total * 100.0,
        low_confidence_count: low,
        low_confidence_pct: low as f64 / total * 100.0,
        avg_entropy: entropies.iter().sum::<f64>() / total,
        max_entropy: entropies.iter().cloned().fold(0.0, f64::max),
    }
}

/// Lower-triangular `L` with `L Lᵀ = matrix`, or `None` if not positive definite
fn cholesky(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let n = matrix.nrows();
    let mut lower = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[[i, j]];
            for k in 0..j {
                sum -= lower[[i, k]] * lower[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                lower[[i, i]] = sum.sqrt();
            } else {
                lower[[i, j]] = sum / lower[[j, j]];
            }
        }
    }
    Some(lower)
}

/// Solve `L y = b` for lower-triangular `L`
fn forward_substitute(lower: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= lower[[i, k]] * y[k];
        }
        y[i] = sum / lower[[i, i]];
    }
    y
}

fn log_sum_exp(values: &ndarray::ArrayView1<f64>) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::blobs;
    use ndarray::array;

    #[test]
    fn test_separated_blobs() {
        let data = blobs(&[&[0.0, 0.0], &[10.0, 10.0]], 50, 0.5, 21);
        let mut model = GmmClusterer::new(2).with_n_init(3);
        let assignment = model.fit_predict(&data).unwrap();

        let first = assignment.labels[0];
        assert!(assignment.labels.iter().take(50).all(|&l| l == first));
        assert!(assignment.labels.iter().skip(50).all(|&l| l != first));
        assert!(model.converged().unwrap());

        let weights = model.get_weights().unwrap();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!(weights.iter().all(|&w| (w - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_probabilities_sum_to_one_and_match_labels() {
        let data = blobs(&[&[0.0, 0.0], &[3.0, 0.0], &[0.0, 3.0]], 30, 1.0, 8);
        let mut model = GmmClusterer::new(3).with_n_init(2);
        let assignment = model.fit_predict(&data).unwrap();
        let probabilities = assignment.memberships.unwrap();

        for (row, &label) in probabilities.outer_iter().zip(assignment.labels.iter()) {
            assert!((row.sum() - 1.0).abs() < 1e-6);
            assert_eq!(metrics::argmax(&row), label);
        }
    }

    #[test]
    fn test_overlapping_blobs_report_low_confidence() {
        let data = blobs(&[&[0.0, 0.0], &[0.5, 0.5]], 100, 1.0, 5);
        let mut model = GmmClusterer::new(2).with_n_init(2);
        model.fit(&data).unwrap();
        let uncertainty = model.uncertainty_metrics(&data.features).unwrap();

        assert!(uncertainty.low_confidence_pct > 0.0, "{uncertainty:?}");
        assert!(uncertainty.avg_entropy > 0.0);
        assert_eq!(
            uncertainty.low_confidence_count as f64 / 200.0 * 100.0,
            uncertainty.low_confidence_pct
        );
    }

    #[test]
    fn test_covariance_shapes_per_type() {
        let data = blobs(&[&[0.0, 0.0, 0.0], &[6.0, 6.0, 6.0]], 30, 1.0, 17);
        for covariance_type in [
            CovarianceType::Full,
            CovarianceType::Tied,
            CovarianceType::Diag,
            CovarianceType::Spherical,
        ] {
            let mut model = GmmClusterer::new(2)
                .with_covariance_type(covariance_type)
                .with_n_init(2);
            model.fit(&data).unwrap();
            let covariances = model.get_covariances().unwrap();
            assert_eq!(covariances.covariance_type(), covariance_type);
            match covariances {
                Covariances::Full(c) => assert_eq!(c.dim(), (2, 3, 3)),
                Covariances::Tied(c) => assert_eq!(c.dim(), (3, 3)),
                Covariances::Diag(c) => assert_eq!(c.dim(), (2, 3)),
                Covariances::Spherical(c) => assert_eq!(c.len(), 2),
            }
            for k in 0..2 {
                assert!(covariances
                    .component_diagonal(k, 3)
                    .iter()
                    .all(|&v| v > 0.0));
            }
        }
    }

    #[test]
    fn test_information_criteria() {
        let data = blobs(&[&[0.0, 0.0], &[8.0, 8.0]], 40, 1.0, 3);
        let mut model = GmmClusterer::new(2).with_n_init(1);
        model.fit(&data).unwrap();

        // Full covariance in 2-D: 2 * 3 covariance + 4 mean + 1 weight
        assert_eq!(model.n_parameters(2), 11);

        let n = 80.0_f64;
        let bic = model.bic(&data.features).unwrap();
        let aic = model.aic(&data.features).unwrap();
        assert!((bic - aic - 11.0 * (n.ln() - 2.0)).abs() < 1e-6);

        let metrics = model.metrics(&data).unwrap();
        let score = model.score(&data.features).unwrap();
        assert!((metrics.log_likelihood - score * n).abs() < 1e-6);
        assert!(metrics.silhouette_score > 0.5);
    }

    #[test]
    fn test_fit_is_deterministic_under_seed() {
        let data = blobs(&[&[0.0, 0.0], &[2.0, 2.0]], 40, 1.0, 12);
        let mut a = GmmClusterer::new(2).with_seed(9).with_n_init(3);
        let mut b = GmmClusterer::new(2).with_seed(9).with_n_init(3);
        let pa = a.fit_predict(&data).unwrap().memberships.unwrap();
        let pb = b.fit_predict(&data).unwrap().memberships.unwrap();
        assert_eq!(pa, pb);
        assert_eq!(a.n_iterations().unwrap(), b.n_iterations().unwrap());
        assert_eq!(a.cluster_centers().unwrap(), b.cluster_centers().unwrap());
        assert_eq!(a.get_weights().unwrap(), b.get_weights().unwrap());
    }

    #[test]
    fn test_non_convergence_is_reported() {
        let data = blobs(&[&[0.0, 0.0], &[1.0, 1.0]], 30, 1.0, 4);
        let mut model = GmmClusterer::new(2)
            .with_max_iter(1)
            .with_tolerance(0.0)
            .with_n_init(1);
        let assignment = model.fit_predict(&data).unwrap();
        assert_eq!(assignment.labels.len(), 60);
        assert!(!model.converged().unwrap());
        assert_eq!(model.n_iterations().unwrap(), 1);
    }

    #[test]
    fn test_profile_carries_mixture_details() {
        let data = blobs(&[&[0.0, 0.0], &[10.0, 10.0]], 25, 0.5, 6);
        let mut model = GmmClusterer::new(2)
            .with_covariance_type(CovarianceType::Spherical)
            .with_n_init(1);
        model.fit(&data).unwrap();
        let profile = model.generate_profile(&data).unwrap();

        assert!(profile.uncertainty_metrics.is_some());
        let weights = profile.mixture_weights.as_ref().unwrap();
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        for cluster in profile.clusters.values() {
            match &cluster.extension {
                ClusterExtension::Gmm {
                    covariance_info, ..
                } => {
                    assert_eq!(covariance_info.covariance_type, CovarianceType::Spherical);
                    assert!(covariance_info.variance.is_some());
                    assert!(covariance_info.feature_variances.is_none());
                }
                other => panic!("unexpected extension {other:?}"),
            }
        }
    }

    #[test]
    fn test_cholesky() {
        let matrix = array![[4.0, 2.0], [2.0, 3.0]];
        let lower = cholesky(&matrix).unwrap();
        let rebuilt = lower.dot(&lower.t());
        for (a, b) in rebuilt.iter().zip(matrix.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(cholesky(&array![[1.0, 2.0], [2.0, 1.0]]).is_none());
    }

    #[test]
    fn test_uncertainty_thresholds() {
        let probabilities = array![[0.95, 0.05], [0.5, 0.5], [0.8, 0.2]];
        let uncertainty = uncertainty_from_probabilities(&probabilities);
        assert_eq!(uncertainty.high_confidence_count, 1);
        assert_eq!(uncertainty.low_confidence_count, 1);
        assert!((uncertainty.avg_max_probability - 0.75).abs() < 1e-12);
        assert!((uncertainty.max_entropy - 2.0_f64.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_configuration_errors() {
        let data = blobs(&[&[0.0, 0.0], &[1.0, 1.0]], 5, 1.0, 1);
        let mut model = GmmClusterer::new(2).with_n_init(0);
        assert!(model.fit(&data).unwrap_err().is_configuration());

        let mut model = GmmClusterer::new(11);
        assert!(model.fit(&data).unwrap_err().is_configuration());

        let model = GmmClusterer::new(2);
        assert!(matches!(
            model.predict_proba(&data.features),
            Err(SegmentError::NotFitted(_))
        ));
    }
}
