//! Chart rendering with Plotters.
//!
//! Charts are a convenience sink on top of the CSV artifacts: any failure
//! here surfaces as a [`PipelineError::Sink`] that the orchestrator logs
//! and moves past, never a run abort.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use plotters::prelude::*;

use crate::cluster::ClusterModel;
use crate::error::{PipelineError, Result};
use crate::features::FEATURE_COLUMNS;

pub const SCATTER_FILE: &str = "segments_scatter.png";
pub const DISTRIBUTION_FILE: &str = "cluster_distribution.png";

/// Color palette for clusters; labels past the palette fall back to black.
const CLUSTER_COLORS: [RGBColor; 5] = [RED, BLUE, GREEN, YELLOW, MAGENTA];

fn cluster_color(label: usize) -> &'static RGBColor {
    CLUSTER_COLORS.get(label).unwrap_or(&BLACK)
}

fn padded_bounds(values: &[f64]) -> (f64, f64) {
    let min = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    (min - 0.5, max + 0.5)
}

/// Render both charts into the output directory, returning the paths.
pub fn render_report(
    scaled: &Array2<f64>,
    model: &ClusterModel,
    dir: &Path,
) -> Result<(PathBuf, PathBuf)> {
    let scatter = dir.join(SCATTER_FILE);
    render_scatter(scaled, model, &scatter)?;
    let distribution = dir.join(DISTRIBUTION_FILE);
    render_distribution(model, &distribution)?;
    Ok((scatter, distribution))
}

/// Scatter of the first two scaled features, points colored by cluster and
/// centroids drawn as squares.
pub fn render_scatter(scaled: &Array2<f64>, model: &ClusterModel, path: &Path) -> Result<()> {
    draw_scatter(scaled, model, path)
        .map_err(|e| PipelineError::Sink(format!("scatter chart: {e}")))
}

fn draw_scatter(scaled: &Array2<f64>, model: &ClusterModel, path: &Path) -> anyhow::Result<()> {
    let xs: Vec<f64> = scaled.column(0).to_vec();
    let ys: Vec<f64> = scaled.column(1).to_vec();
    let (x_min, x_max) = padded_bounds(&xs);
    let (y_min, y_max) = padded_bounds(&ys);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Customer Segments (scaled feature space)", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(format!("{} (scaled)", FEATURE_COLUMNS[0]))
        .y_desc(format!("{} (scaled)", FEATURE_COLUMNS[1]))
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, (&x, &y)) in xs.iter().zip(ys.iter()).enumerate() {
        let color = cluster_color(model.labels[i]);
        chart.draw_series(std::iter::once(Circle::new((x, y), 4, color.filled())))?;
    }

    for (label, centroid) in model.centroids.outer_iter().enumerate() {
        let (cx, cy) = (centroid[0], centroid[1]);
        let color = cluster_color(label);
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(cx - 0.1, cy - 0.1), (cx + 0.1, cy + 0.1)],
                color.filled(),
            )))?
            .label(format!("Cluster {label}"))
            .legend(move |(x, y)| Rectangle::new([(x, y), (x + 10, y + 10)], color.filled()));
    }

    chart.configure_series_labels().draw()?;
    root.present()?;
    Ok(())
}

/// Bar chart of customers per cluster.
pub fn render_distribution(model: &ClusterModel, path: &Path) -> Result<()> {
    draw_distribution(model, path)
        .map_err(|e| PipelineError::Sink(format!("distribution chart: {e}")))
}

fn draw_distribution(model: &ClusterModel, path: &Path) -> anyhow::Result<()> {
    let sizes = model.cluster_sizes();
    let max_size = sizes.iter().copied().max().unwrap_or(1).max(1) as f64;

    let root = BitMapBackend::new(path, (600, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Customers per Cluster", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..(model.clusters as f64), 0f64..(max_size * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("Cluster")
        .y_desc("Number of Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (label, &size) in sizes.iter().enumerate() {
        let color = cluster_color(label);
        chart.draw_series(std::iter::once(Rectangle::new(
            [(label as f64 + 0.1, 0.0), (label as f64 + 0.9, size as f64)],
            color.filled(),
        )))?;
    }

    root.present()?;
    Ok(())
}
