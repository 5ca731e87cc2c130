//! Synthetic data shared by unit tests

use crate::data::FeatureMatrix;
use ndarray::{concatenate, Array1, Array2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Gaussian blobs around `centers`, `n_per_blob` points each, columns `x0..`
pub fn blobs(centers: &[&[f64]], n_per_blob: usize, std: f64, seed: u64) -> FeatureMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let dims = centers[0].len();
    let parts: Vec<Array2<f64>> = centers
        .iter()
        .map(|center| {
            let noise = Array2::random_using(
                (n_per_blob, dims),
                Normal::new(0.0, std).unwrap(),
                &mut rng,
            );
            noise + &Array1::from(center.to_vec())
        })
        .collect();
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    let raw = concatenate(Axis(0), &views).unwrap();
    let columns = (0..dims).map(|j| format!("x{j}")).collect();
    FeatureMatrix::from_raw(raw, columns).unwrap()
}
