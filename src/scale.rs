//! Feature scaling for distance-based clustering.
//!
//! K-Means distances are meaningless when one feature spans thousands of
//! currency units and another a handful of orders, so retained rows are
//! z-scored per feature before fitting. Statistics use the population
//! standard deviation (no Bessel correction).

use ndarray::{Array1, Array2, Axis};

use crate::features::SENTINEL_RECENCY_DAYS;

/// Z-score scaler fitted on a feature matrix.
///
/// A feature with zero variance carries no distance signal; its scaled
/// column is defined as all zeros so no division by zero (and no non-finite
/// value) can reach the clustering stage.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    means: Array1<f64>,
    stds: Array1<f64>,
}

impl StandardScaler {
    /// Fit per-feature mean and population standard deviation.
    pub fn fit(data: &Array2<f64>) -> Self {
        let means = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.ncols()));
        let stds = data.std_axis(Axis(0), 0.0);
        Self { means, stds }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut scaled = Array2::zeros(data.dim());
        for ((i, j), value) in data.indexed_iter() {
            let std = self.stds[j];
            scaled[[i, j]] = if std > 0.0 && std.is_finite() {
                (value - self.means[j]) / std
            } else {
                0.0
            };
        }
        scaled
    }

    pub fn mean(&self, feature: usize) -> f64 {
        self.means[feature]
    }

    pub fn std(&self, feature: usize) -> f64 {
        self.stds[feature]
    }
}

/// Rows that survived the activity filter, with their unscaled and scaled
/// feature values.
#[derive(Debug)]
pub struct RetainedRows {
    /// Indices into the original feature-table rows, in original order.
    pub indices: Vec<usize>,
    /// Unscaled feature values of the retained rows.
    pub raw: Array2<f64>,
    /// Z-scored feature values of the retained rows.
    pub scaled: Array2<f64>,
    /// Rows dropped for having no activity signal at all.
    pub dropped: usize,
}

/// Drop customers with no usable activity signal (all features zero and
/// sentinel recency), then fit and apply the scaler on what remains. The
/// scaler must not see the dropped rows: a block of sentinel recencies
/// would otherwise dominate the recency mean and variance.
pub fn filter_and_scale(matrix: &Array2<f64>) -> RetainedRows {
    let width = matrix.ncols();
    let mut indices = Vec::new();
    for (i, row) in matrix.outer_iter().enumerate() {
        // Feature order: orders, sales, avg value, quantity, recency.
        let inactive = row[0] == 0.0
            && row[1] == 0.0
            && row[2] == 0.0
            && row[3] == 0.0
            && row[4] == SENTINEL_RECENCY_DAYS;
        if !inactive {
            indices.push(i);
        }
    }

    let mut raw = Array2::zeros((indices.len(), width));
    for (new_row, &old_row) in indices.iter().enumerate() {
        raw.row_mut(new_row).assign(&matrix.row(old_row));
    }
    let scaler = StandardScaler::fit(&raw);
    let scaled = scaler.transform(&raw);
    RetainedRows {
        dropped: matrix.nrows() - indices.len(),
        indices,
        raw,
        scaled,
    }
}
