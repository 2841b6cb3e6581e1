//! Parallel k-means under the L1 distance.
//!
//! ## The Iteration
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//! init ─▶ assign ─▶ update ─▶ measure ─▶ rate ≥ threshold?
//!                                           │ no / cap reached
//!                                           ▼
//!                                         done
//! ```
//!
//! - **assign** ([`AssignmentTracker`]): nearest centroid per sample, written
//!   into a two-slot history so the previous pass survives for comparison.
//! - **update** ([`update_centroids`]): per-cluster mean of assigned samples;
//!   empty clusters keep their coordinates.
//! - **measure**: the modification rate, the fraction of samples whose
//!   cluster changed.
//!
//! ## Distance
//!
//! L1 (Manhattan), not squared Euclidean:
//!
//! ```text
//! dist(x, μ) = Σ_d |x_d − μ_d|
//! ```
//!
//! ## Parallelism
//!
//! Each [`ClusteringState`] owns a rayon pool with a fixed number of workers.
//! Phases are fork/join: a phase finishes on every worker before the next
//! starts. Results are bit-identical for any worker count.
//!
//! ## Usage
//!
//! ```rust
//! use centra::cluster::{ClusteringState, Termination};
//! use ndarray::array;
//!
//! // D×M: one column per sample.
//! let samples = array![
//!     [0.0f32, 0.1, 0.2, 10.0, 10.1, 10.2],
//!     [0.0, 0.2, 0.1, 10.0, 10.2, 10.1],
//! ];
//!
//! let mut state = ClusteringState::new(samples.view(), 2, true, 2).unwrap();
//! let termination = state.run(20, Some(0.01)).unwrap();
//!
//! assert_eq!(state.assignments().len(), 6);
//! assert!(termination.iterations() <= 20);
//! assert_eq!(state.centroids().dim(), (2, 2));
//! ```

mod assign;
mod distance;
mod kmeans;
mod traits;
mod update;

pub use assign::{AssignStrategy, AssignmentTracker, MAX_CLUSTERS};
pub use distance::l1_distance;
pub use kmeans::{ClusteringState, KmeansFit, L1Kmeans, Phase, Termination};
pub use traits::Clustering;
pub use update::update_centroids;
