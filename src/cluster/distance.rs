//! L1 (Manhattan) distance between a sample and a centroid.
//!
//! ```text
//! dist(s, c) = Σ_d |s_d − c_d|
//! ```
//!
//! Cluster boundaries under L1 are not the Voronoi cells of classic k-means:
//! they are piecewise-linear and axis-sensitive. Every assignment path calls
//! this one function so distances are bit-identical across strategies.

use ndarray::ArrayView1;

/// Sum of absolute coordinate differences, accumulated in dimension order.
#[inline]
pub fn l1_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .fold(0.0f32, |acc, (x, y)| acc + (x - y).abs())
}
