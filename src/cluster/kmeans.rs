//! K-means under the L1 distance, with assignment-history convergence.
//!
//! Partitions D-dimensional samples into k clusters by alternating two
//! steps (Lloyd):
//!
//! 1. **Assign**: each sample → nearest centroid (L1, lowest index on ties)
//! 2. **Update**: each centroid → mean of its assigned samples
//!
//! # Layout
//!
//! Samples are a D×M matrix (one **column** per sample) and centroids a D×K
//! matrix (one column per cluster). The sample matrix is borrowed for the
//! whole run; the centroids are owned by [`ClusteringState`].
//!
//! # Initialization
//!
//! Each centroid coordinate is drawn uniformly in `[min_d, max_d]`, the range
//! of dimension `d` over the samples. No k-means++ seeding.
//!
//! # Stopping
//!
//! The run stops when the iteration cap is reached or, with a threshold set,
//! when the **modification rate** (fraction of samples whose assignment changed
//! between the last two passes) drops below it:
//!
//! ```text
//! continue while  rate ≥ threshold
//! ```
//!
//! The rate needs the previous assignment. With history tracking off (it is
//! on by default) there is no rate, the threshold is ignored and the run
//! always goes to the cap.
//!
//! # Failure Modes
//!
//! - **Empty clusters**: a centroid that attracts no samples keeps its
//!   coordinates forever unless samples drift towards it. It is never reseeded.
//! - **Mean vs median**: the L1 objective is minimized by the median, but the
//!   update uses the mean, so the cost is not guaranteed to decrease
//!   monotonically. Use the iteration cap.
//! - **Local optima**: uniform initialization inside the bounding box can
//!   place two centroids on the same mode.

use super::assign::{AssignStrategy, AssignmentTracker, MAX_CLUSTERS};
use super::traits::Clustering;
use super::update::update_centroids;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use rand::distr::Uniform;
use rand::prelude::*;
use rayon::prelude::*;
use tracing::{debug, trace};

/// K-means configuration (L1 distance).
#[derive(Debug, Clone)]
pub struct L1Kmeans {
    /// Number of clusters.
    k: usize,
    /// Keep the previous assignment for convergence checks.
    track_history: bool,
    /// Worker threads.
    n_threads: usize,
    /// Random seed.
    seed: Option<u64>,
    /// Assignment parallelization.
    strategy: AssignStrategy,
    /// Maximum iterations (used by `fit`).
    max_iter: usize,
    /// Modification-rate threshold (used by `fit`).
    threshold: Option<f64>,
}

impl L1Kmeans {
    /// Create a new configuration for `k` clusters.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            track_history: true,
            n_threads: 1,
            seed: None,
            strategy: AssignStrategy::PerSample,
            max_iter: 100,
            threshold: None,
        }
    }

    /// Enable or disable assignment history (without it thresholds are ignored).
    pub fn with_history(mut self, track_history: bool) -> Self {
        self.track_history = track_history;
        self
    }

    /// Set the number of worker threads.
    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the assignment parallelization scheme.
    pub fn with_strategy(mut self, strategy: AssignStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Stop once the modification rate falls below `threshold`.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Validate the configuration against a D×M sample matrix, draw uniform
    /// centroids, and run the first iteration.
    pub fn init<'a>(&self, samples: ArrayView2<'a, f32>) -> Result<ClusteringState<'a>> {
        self.validate(samples)?;
        let pool = self.build_pool()?;

        let mut rng: Box<dyn RngCore> = match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::rng()),
        };
        let bounds = pool.install(|| dimension_bounds(samples));
        let centroids = uniform_centroids(&bounds, self.k, &mut rng)?;

        self.start(samples, centroids, pool)
    }

    /// Like [`init`](Self::init), but start from caller-supplied D×K centroids.
    pub fn init_with_centroids<'a>(
        &self,
        samples: ArrayView2<'a, f32>,
        centroids: Array2<f32>,
    ) -> Result<ClusteringState<'a>> {
        self.validate(samples)?;
        if centroids.nrows() != samples.nrows() {
            return Err(Error::DimensionMismatch {
                expected: samples.nrows(),
                found: centroids.nrows(),
            });
        }
        if centroids.ncols() != self.k {
            return Err(Error::DimensionMismatch {
                expected: self.k,
                found: centroids.ncols(),
            });
        }
        if !centroids.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "centroids",
                message: "must be finite",
            });
        }
        let pool = self.build_pool()?;
        self.start(samples, centroids, pool)
    }

    /// Initialize and run to convergence or the iteration cap.
    pub fn fit(&self, samples: ArrayView2<'_, f32>) -> Result<KmeansFit> {
        let mut state = self.init(samples)?;
        state.run(self.max_iter, self.threshold)?;
        Ok(state.into_fit())
    }

    fn validate(&self, samples: ArrayView2<'_, f32>) -> Result<()> {
        let (d, m) = samples.dim();
        if d == 0 || m == 0 {
            return Err(Error::EmptyInput);
        }
        if self.k == 0 || self.k > m {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: m,
            });
        }
        if self.k > MAX_CLUSTERS {
            return Err(Error::InvalidParameter {
                name: "k",
                message: "cluster index must fit in 32 bits",
            });
        }
        if self.n_threads == 0 {
            return Err(Error::InvalidParameter {
                name: "n_threads",
                message: "must be at least 1",
            });
        }
        if !samples.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "samples",
                message: "must be finite",
            });
        }
        Ok(())
    }

    fn build_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_threads)
            .build()
            .map_err(|e| Error::Other(format!("thread pool setup failed: {e}")))
    }

    fn start<'a>(
        &self,
        samples: ArrayView2<'a, f32>,
        centroids: Array2<f32>,
        pool: rayon::ThreadPool,
    ) -> Result<ClusteringState<'a>> {
        let tracker =
            AssignmentTracker::new(samples.ncols(), self.track_history).with_strategy(self.strategy);
        let mut state = ClusteringState {
            samples,
            centroids,
            tracker,
            cluster_sizes: vec![0; self.k],
            iterations: 0,
            phase: Phase::Assigned,
            pool,
        };

        state.assign()?;
        state.update()?;
        state.iterations = 1;

        debug!(
            dims = samples.nrows(),
            samples = samples.ncols(),
            clusters = self.k,
            threads = self.n_threads,
            strategy = ?self.strategy,
            history = self.track_history,
            "clustering state initialized"
        );
        Ok(state)
    }
}

impl Default for L1Kmeans {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Per-dimension `(min, max)` over the samples.
fn dimension_bounds(samples: ArrayView2<'_, f32>) -> Vec<(f32, f32)> {
    (0..samples.nrows())
        .into_par_iter()
        .map(|r| {
            samples
                .row(r)
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| {
                    (lo.min(x), hi.max(x))
                })
        })
        .collect()
}

/// Draw a D×K centroid matrix, dimension-major, uniformly within `bounds`.
///
/// Draws happen in `f64`: the width of a finite `f32` range can exceed
/// `f32::MAX`. Rounding back to `f32` stays inside `[lo, hi]`.
fn uniform_centroids(bounds: &[(f32, f32)], k: usize, rng: &mut impl Rng) -> Result<Array2<f32>> {
    let dists = bounds
        .iter()
        .map(|&(lo, hi)| {
            Uniform::new_inclusive(f64::from(lo), f64::from(hi))
                .map_err(|e| Error::Other(format!("uniform initialization failed: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Array2::from_shape_fn((bounds.len(), k), |(r, _)| {
        rng.sample(&dists[r]) as f32
    }))
}

/// Where a [`ClusteringState`] is in the assign → update → measure cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// An assignment pass has completed.
    Assigned,
    /// Centroids have been recomputed from the latest assignment.
    Updated,
    /// An iteration finished and the stopping rule asked for more.
    Continuing,
    /// The modification rate fell below the threshold.
    Converged,
    /// The iteration cap was reached.
    Terminated,
}

/// Why [`ClusteringState::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Termination {
    /// The modification rate fell below the threshold.
    Converged {
        /// Total iterations performed.
        iterations: usize,
        /// Rate measured on the final iteration.
        modification_rate: f64,
    },
    /// The iteration cap was reached.
    MaxIterations {
        /// Total iterations performed.
        iterations: usize,
    },
}

impl Termination {
    /// Total iterations performed.
    pub fn iterations(&self) -> usize {
        match *self {
            Termination::Converged { iterations, .. } => iterations,
            Termination::MaxIterations { iterations } => iterations,
        }
    }
}

/// Final result of a clustering run.
#[derive(Debug, Clone)]
pub struct KmeansFit {
    /// D×K centroid matrix.
    pub centroids: Array2<f32>,
    /// Cluster index per sample.
    pub labels: Vec<usize>,
    /// Samples per cluster in the final update.
    pub cluster_sizes: Vec<usize>,
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the run stopped on the modification-rate threshold.
    pub converged: bool,
}

/// A clustering run in progress.
///
/// Owns the centroids, the assignment buffers and the worker pool; borrows
/// the samples. Every parallel phase runs on the owned pool.
#[derive(Debug)]
pub struct ClusteringState<'a> {
    samples: ArrayView2<'a, f32>,
    centroids: Array2<f32>,
    tracker: AssignmentTracker,
    cluster_sizes: Vec<usize>,
    iterations: usize,
    phase: Phase,
    pool: rayon::ThreadPool,
}

impl<'a> ClusteringState<'a> {
    /// Construct with uniform random centroids and run the first iteration.
    ///
    /// `samples` is D×M (one column per sample).
    pub fn new(
        samples: ArrayView2<'a, f32>,
        k: usize,
        track_history: bool,
        n_threads: usize,
    ) -> Result<Self> {
        L1Kmeans::new(k)
            .with_history(track_history)
            .with_threads(n_threads)
            .init(samples)
    }

    fn assign(&mut self) -> Result<()> {
        let Self {
            samples,
            centroids,
            tracker,
            pool,
            ..
        } = self;
        let samples = *samples;
        pool.install(|| tracker.assign(samples, centroids.view()))?;
        self.phase = Phase::Assigned;
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        let Self {
            samples,
            centroids,
            tracker,
            cluster_sizes,
            pool,
            ..
        } = self;
        let samples = *samples;
        let tracker = &*tracker;
        *cluster_sizes = pool.install(|| update_centroids(samples, tracker.current(), centroids))?;
        self.phase = Phase::Updated;
        Ok(())
    }

    /// One iteration: assign, update, measure. Returns the modification rate
    /// (`None` without history).
    pub fn step(&mut self) -> Result<Option<f64>> {
        self.assign()?;
        self.update()?;
        self.iterations += 1;
        let rate = self.modification_rate();
        trace!(
            iteration = self.iterations,
            modification_rate = ?rate,
            cost = self.tracker.cost(),
            "iteration complete"
        );
        Ok(rate)
    }

    /// Iterate until `max_iterations` total iterations have been performed,
    /// or until the modification rate falls below `threshold`.
    ///
    /// Without history tracking there is no rate, so `threshold` is ignored.
    ///
    /// Construction counts as the first iteration, so `max_iterations == 1`
    /// returns without iterating or checking convergence. The cap applies to
    /// the total, across repeated calls.
    pub fn run(&mut self, max_iterations: usize, threshold: Option<f64>) -> Result<Termination> {
        if max_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iterations",
                message: "must be at least 1",
            });
        }
        if threshold.is_some_and(f64::is_nan) {
            return Err(Error::InvalidParameter {
                name: "threshold",
                message: "must not be NaN",
            });
        }

        while self.iterations < max_iterations {
            let rate = self.step()?;
            match (threshold, rate) {
                (Some(t), Some(r)) if r < t => {
                    self.phase = Phase::Converged;
                    debug!(
                        iterations = self.iterations,
                        modification_rate = r,
                        "converged"
                    );
                    return Ok(Termination::Converged {
                        iterations: self.iterations,
                        modification_rate: r,
                    });
                }
                _ => self.phase = Phase::Continuing,
            }
        }

        self.phase = Phase::Terminated;
        debug!(iterations = self.iterations, "iteration cap reached");
        Ok(Termination::MaxIterations {
            iterations: self.iterations,
        })
    }

    /// The borrowed D×M sample matrix.
    pub fn samples(&self) -> ArrayView2<'a, f32> {
        self.samples
    }

    /// Current D×K centroids.
    pub fn centroids(&self) -> ArrayView2<'_, f32> {
        self.centroids.view()
    }

    /// Cluster index per sample from the latest pass.
    pub fn assignments(&self) -> &[usize] {
        self.tracker.current()
    }

    /// Cluster index per sample from the pass before the latest.
    pub fn previous_assignments(&self) -> Option<&[usize]> {
        self.tracker.previous()
    }

    /// Iterations performed so far (construction counts as one).
    pub fn iterations_performed(&self) -> usize {
        self.iterations
    }

    /// Samples per cluster in the latest update.
    pub fn cluster_sizes(&self) -> &[usize] {
        &self.cluster_sizes
    }

    /// Distance from each sample to its centroid at the latest pass.
    pub fn best_distances(&self) -> Vec<f32> {
        self.tracker.best_distances()
    }

    /// Total L1 distance at the latest pass.
    pub fn cost(&self) -> f64 {
        self.tracker.cost()
    }

    /// Fraction of samples that changed cluster in the latest pass.
    pub fn modification_rate(&self) -> Option<f64> {
        let tracker = &self.tracker;
        self.pool.install(|| tracker.modification_rate())
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of worker threads.
    pub fn n_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Consume the state into its final result.
    pub fn into_fit(self) -> KmeansFit {
        let converged = self.phase == Phase::Converged;
        KmeansFit {
            centroids: self.centroids,
            labels: self.tracker.into_current(),
            cluster_sizes: self.cluster_sizes,
            iterations: self.iterations,
            converged,
        }
    }
}

impl Clustering for L1Kmeans {
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<usize>> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let n = data.len();
        let d = data[0].len();
        for point in data {
            if point.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: point.len(),
                });
            }
        }

        // Row-per-point input → one column per sample.
        let samples = Array2::from_shape_fn((d, n), |(r, i)| data[i][r]);
        self.fit(samples.view()).map(|fit| fit.labels)
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}
