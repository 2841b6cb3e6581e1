//! Clustering traits.

use crate::error::Result;

/// Trait for hard clustering algorithms over row-per-point input.
pub trait Clustering {
    /// Fit the model to data and return cluster assignments.
    ///
    /// `data[i]` is point `i`; returns one cluster label per point.
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<usize>>;

    /// Get the number of clusters.
    fn n_clusters(&self) -> usize;
}
