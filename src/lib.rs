//! # centra
//!
//! Shared-memory parallel k-means with L1 distance and assignment-history
//! convergence tracking.
//!
//! The public API lives under [`cluster`]:
//! - [`ClusteringState`]: the iterate-until-converged driver
//! - [`L1Kmeans`]: configuration builder and [`Clustering`] implementation
//! - [`AssignmentTracker`] and [`update_centroids`]: the two phases, for
//!   callers that drive iterations themselves
//!
//! Samples and centroids are `ndarray` matrices with one column per sample
//! (resp. per cluster). Parallel phases run on a `rayon` pool sized by the
//! caller. Progress is reported through `tracing` events.

pub mod cluster;
/// Error types used across `centra`.
pub mod error;

pub use cluster::{
    l1_distance, update_centroids, AssignStrategy, AssignmentTracker, Clustering,
    ClusteringState, KmeansFit, L1Kmeans, Phase, Termination,
};
pub use error::{Error, Result};
