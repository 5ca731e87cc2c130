//! Cluster quality metrics shared by the three clusterers
//!
//! All functions take rows as samples. Metrics that need at least two
//! clusters return 0.0 when only one is present; callers log that case.

use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Floor added inside logarithms of membership degrees
const LOG_EPS: f64 = 1e-10;

/// Calculate Euclidean distance between two points
pub fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Index of the largest entry; ties go to the lowest index
pub fn argmax(row: &ArrayView1<f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (idx, &value) in row.iter().enumerate() {
        if value > best_value {
            best_value = value;
            best = idx;
        }
    }
    best
}

/// Hard labels from a (n_samples, n_clusters) membership or probability matrix
pub fn labels_from_memberships(memberships: &Array2<f64>) -> Array1<usize> {
    memberships
        .outer_iter()
        .map(|row| argmax(&row))
        .collect::<Array1<usize>>()
}

/// Number of rows carrying each label, indexed by label
pub fn label_counts(labels: &Array1<usize>) -> Vec<usize> {
    let n_labels = labels.iter().max().map_or(0, |&max| max + 1);
    let mut counts = vec![0; n_labels];
    for &label in labels.iter() {
        counts[label] += 1;
    }
    counts
}

/// Mean point of each label; empty labels get `None`
pub fn label_centroids(features: &Array2<f64>, labels: &Array1<usize>) -> Vec<Option<Array1<f64>>> {
    let counts = label_counts(labels);
    let mut sums = vec![Array1::<f64>::zeros(features.ncols()); counts.len()];
    for (row, &label) in features.outer_iter().zip(labels.iter()) {
        sums[label] += &row;
    }
    sums.into_iter()
        .zip(counts)
        .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
        .collect()
}

fn present_clusters(labels: &Array1<usize>) -> usize {
    label_counts(labels).iter().filter(|&&c| c > 0).count()
}

/// Mean silhouette coefficient over all samples
///
/// Samples in singleton clusters score 0, matching the usual convention.
pub fn silhouette_score(features: &Array2<f64>, labels: &Array1<usize>) -> f64 {
    let n_samples = features.nrows();
    if n_samples < 2 || present_clusters(labels) < 2 {
        return 0.0;
    }

    let counts = label_counts(labels);
    let mut silhouette_sum = 0.0;
    let mut distance_sums = vec![0.0; counts.len()];

    for i in 0..n_samples {
        distance_sums.iter_mut().for_each(|s| *s = 0.0);
        let point = features.row(i);
        for j in 0..n_samples {
            if i == j {
                continue;
            }
            distance_sums[labels[j]] += euclidean_distance(&point, &features.row(j));
        }

        let own = labels[i];
        if counts[own] < 2 {
            continue;
        }
        let a_i = distance_sums[own] / (counts[own] - 1) as f64;
        let b_i = distance_sums
            .iter()
            .zip(counts.iter())
            .enumerate()
            .filter(|&(label, (_, &count))| label != own && count > 0)
            .map(|(_, (&sum, &count))| sum / count as f64)
            .fold(f64::INFINITY, f64::min);

        let denom = a_i.max(b_i);
        if denom > 0.0 && b_i.is_finite() {
            silhouette_sum += (b_i - a_i) / denom;
        }
    }

    silhouette_sum / n_samples as f64
}

/// Davies-Bouldin index (lower is better)
pub fn davies_bouldin_index(features: &Array2<f64>, labels: &Array1<usize>) -> f64 {
    let centroids: Vec<(usize, Array1<f64>)> = label_centroids(features, labels)
        .into_iter()
        .enumerate()
        .filter_map(|(label, c)| c.map(|c| (label, c)))
        .collect();
    if centroids.len() < 2 {
        return 0.0;
    }

    let counts = label_counts(labels);
    let mut scatter = vec![0.0; counts.len()];
    for (row, &label) in features.outer_iter().zip(labels.iter()) {
        if let Some((_, centroid)) = centroids.iter().find(|(l, _)| *l == label) {
            scatter[label] += euclidean_distance(&row, &centroid.view());
        }
    }
    for (label, s) in scatter.iter_mut().enumerate() {
        if counts[label] > 0 {
            *s /= counts[label] as f64;
        }
    }

    let worst_ratios: f64 = centroids
        .iter()
        .map(|(li, ci)| {
            centroids
                .iter()
                .filter(|(lj, _)| lj != li)
                .map(|(lj, cj)| {
                    let separation = euclidean_distance(&ci.view(), &cj.view());
                    if separation == 0.0 {
                        0.0
                    } else {
                        (scatter[*li] + scatter[*lj]) / separation
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();

    worst_ratios / centroids.len() as f64
}

/// Calinski-Harabasz variance ratio (higher is better)
pub fn calinski_harabasz_score(features: &Array2<f64>, labels: &Array1<usize>) -> f64 {
    let n_samples = features.nrows();
    let centroids = label_centroids(features, labels);
    let n_clusters = centroids.iter().filter(|c| c.is_some()).count();
    if n_clusters < 2 || n_samples <= n_clusters {
        return 0.0;
    }

    let overall = match features.mean_axis(Axis(0)) {
        Some(mean) => mean,
        None => return 0.0,
    };
    let counts = label_counts(labels);

    let between: f64 = centroids
        .iter()
        .enumerate()
        .filter_map(|(label, c)| c.as_ref().map(|c| (label, c)))
        .map(|(label, c)| counts[label] as f64 * euclidean_distance(&c.view(), &overall.view()).powi(2))
        .sum();

    let within: f64 = features
        .outer_iter()
        .zip(labels.iter())
        .filter_map(|(row, &label)| {
            centroids[label]
                .as_ref()
                .map(|c| euclidean_distance(&row, &c.view()).powi(2))
        })
        .sum();

    if within == 0.0 {
        return 1.0;
    }
    between * (n_samples - n_clusters) as f64 / (within * (n_clusters - 1) as f64)
}

/// Mean of squared memberships, in [1/c, 1]; higher means crisper
pub fn partition_coefficient(memberships: &Array2<f64>) -> f64 {
    let n_samples = memberships.nrows().max(1) as f64;
    memberships.iter().map(|u| u * u).sum::<f64>() / n_samples
}

/// Mean membership entropy, in [0, ln c]; lower means crisper
pub fn partition_entropy(memberships: &Array2<f64>) -> f64 {
    let n_samples = memberships.nrows().max(1) as f64;
    memberships
        .outer_iter()
        .map(|row| row_entropy(&row))
        .sum::<f64>()
        / n_samples
}

/// Shannon entropy of a probability row (natural log)
pub fn row_entropy(row: &ArrayView1<f64>) -> f64 {
    -row.iter().map(|&p| p * (p + LOG_EPS).ln()).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> (Array2<f64>, Array1<usize>) {
        let features = array![
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1],
        ];
        (features, array![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn test_silhouette_well_separated() {
        let (features, labels) = two_blobs();
        let score = silhouette_score(&features, &labels);
        assert!(score > 0.95, "silhouette {score}");
    }

    #[test]
    fn test_silhouette_single_cluster_is_zero() {
        let (features, _) = two_blobs();
        let labels = Array1::zeros(6);
        assert_eq!(silhouette_score(&features, &labels), 0.0);
    }

    #[test]
    fn test_silhouette_singleton_cluster_scores_zero() {
        let features = array![[0.0], [0.2], [5.0]];
        let labels = array![0, 0, 1];
        // Point 0: a = 0.2, b = 5.0; point 1: a = 0.2, b = 4.8; the singleton adds 0
        let expected = (4.8 / 5.0 + 4.6 / 4.8) / 3.0;
        let score = silhouette_score(&features, &labels);
        assert!((score - expected).abs() < 1e-12, "{score} vs {expected}");
    }

    #[test]
    fn test_davies_bouldin_and_calinski() {
        let (features, labels) = two_blobs();
        let db = davies_bouldin_index(&features, &labels);
        let ch = calinski_harabasz_score(&features, &labels);
        assert!(db > 0.0 && db < 0.1, "db {db}");
        assert!(ch > 1000.0, "ch {ch}");

        let mixed = array![0, 1, 0, 1, 0, 1];
        assert!(davies_bouldin_index(&features, &mixed) > db);
        assert!(calinski_harabasz_score(&features, &mixed) < ch);
    }

    #[test]
    fn test_partition_metrics_bounds() {
        let crisp = array![[1.0, 0.0], [0.0, 1.0]];
        assert!((partition_coefficient(&crisp) - 1.0).abs() < 1e-12);
        assert!(partition_entropy(&crisp).abs() < 1e-8);

        let uniform = array![[0.5, 0.5], [0.5, 0.5]];
        assert!((partition_coefficient(&uniform) - 0.5).abs() < 1e-12);
        assert!((partition_entropy(&uniform) - 2f64.ln()).abs() < 1e-8);
    }

    #[test]
    fn test_argmax_tie_goes_to_lowest_index() {
        let row = array![0.25, 0.375, 0.375];
        assert_eq!(argmax(&row.view()), 1);
        let memberships = array![[0.5, 0.5], [0.2, 0.8]];
        assert_eq!(labels_from_memberships(&memberships), array![0, 1]);
    }

    #[test]
    fn test_label_centroids_skip_empty() {
        let features = array![[0.0, 2.0], [2.0, 4.0], [10.0, 10.0]];
        let labels = array![0, 0, 2];
        let centroids = label_centroids(&features, &labels);
        assert_eq!(centroids.len(), 3);
        assert_eq!(centroids[0].as_ref().unwrap(), &array![1.0, 3.0]);
        assert!(centroids[1].is_none());
        assert_eq!(label_counts(&labels), vec![2, 0, 1]);
    }
}
