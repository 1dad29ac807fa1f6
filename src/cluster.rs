//! K-Means partitioning and per-cluster summaries.

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

use crate::error::{PipelineError, Result};
use crate::features::FEATURE_COLUMNS;

/// Independent k-means++ initializations per fit; the best run by
/// within-cluster sum of squares is kept.
const N_RUNS: usize = 10;

/// Clustering output for one run.
#[derive(Debug)]
pub struct ClusterModel {
    /// Number of clusters K.
    pub clusters: usize,
    /// One label in `0..K` per retained row, in row order.
    pub labels: Array1<usize>,
    /// Cluster centroids in scaled feature space.
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares of the kept run.
    pub inertia: f64,
}

impl ClusterModel {
    /// Customers per cluster, indexed by label.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.clusters];
        for &label in self.labels.iter() {
            if label < self.clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Fit K-Means on the scaled feature matrix.
///
/// The RNG is seeded from the configuration, so a fixed seed and fixed
/// input produce identical labels on every run.
pub fn fit_kmeans(
    scaled: &Array2<f64>,
    clusters: usize,
    seed: u64,
    max_iterations: u64,
    tolerance: f64,
) -> Result<ClusterModel> {
    let rows = scaled.nrows();
    if rows < clusters {
        return Err(PipelineError::InsufficientData { rows, clusters });
    }

    // Dummy targets; clustering is unsupervised.
    let targets: Array1<usize> = Array1::zeros(rows);
    let dataset = Dataset::new(scaled.clone(), targets);

    let rng = Xoshiro256Plus::seed_from_u64(seed);
    let model = KMeans::params_with(clusters, rng, L2Dist)
        .n_runs(N_RUNS)
        .max_n_iterations(max_iterations)
        .tolerance(tolerance)
        .fit(&dataset)
        .map_err(|e| PipelineError::Cluster(e.to_string()))?;

    let labels = model.predict(&dataset);
    let centroids = model.centroids().clone();
    let inertia = within_cluster_ss(scaled, &labels, &centroids);

    Ok(ClusterModel {
        clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Within-cluster sum of squares.
fn within_cluster_ss(
    features: &Array2<f64>,
    labels: &Array1<usize>,
    centroids: &Array2<f64>,
) -> f64 {
    let mut inertia = 0.0;
    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let point = features.row(i);
            let centroid = centroids.row(cluster);
            inertia += point
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>();
        }
    }
    inertia
}

/// Per-cluster summary over the original (unscaled) feature values, so the
/// numbers read in business units: one row per label with the customer
/// count and the mean of each feature.
pub fn cluster_summary(raw: &Array2<f64>, model: &ClusterModel) -> Result<DataFrame> {
    let k = model.clusters;
    let width = FEATURE_COLUMNS.len();
    let mut sums = vec![vec![0.0f64; width]; k];
    let mut counts = vec![0usize; k];
    for (i, &label) in model.labels.iter().enumerate() {
        if label >= k {
            continue;
        }
        counts[label] += 1;
        for j in 0..width {
            sums[label][j] += raw[[i, j]];
        }
    }

    let mean = |j: usize| -> Vec<f64> {
        (0..k)
            .map(|c| {
                if counts[c] > 0 {
                    sums[c][j] / counts[c] as f64
                } else {
                    0.0
                }
            })
            .collect()
    };
    let labels: Vec<i64> = (0..k as i64).collect();
    let customer_counts: Vec<i64> = counts.iter().map(|&c| c as i64).collect();

    Ok(DataFrame::new(vec![
        Series::new("cluster", labels),
        Series::new("n_customers", customer_counts),
        Series::new("avg_total_orders", mean(0)),
        Series::new("avg_total_sales", mean(1)),
        Series::new("avg_order_value", mean(2)),
        Series::new("avg_total_quantity", mean(3)),
        Series::new("avg_recency_days", mean(4)),
    ])?)
}
