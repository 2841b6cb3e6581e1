//! Nearest-centroid assignment with a two-slot assignment history.
//!
//! # The Assignment Pass
//!
//! For every sample `i`, find
//!
//! ```text
//! a_i = argmin_c  dist(x_i, μ_c)      c ∈ [0, K)
//! ```
//!
//! using the L1 distance, keeping the **lowest index** on ties. Samples are
//! independent, so the pass is embarrassingly parallel.
//!
//! # Strategies
//!
//! - [`AssignStrategy::PerSample`]: one task per sample. Each worker owns its
//!   sample's slot outright; no synchronization at all.
//! - [`AssignStrategy::CrossCluster`]: one task per (cluster, sample) pair.
//!   Several workers race on the same sample's best candidate, so the
//!   compare-and-commit must be a single atomic step.
//!
//! # Packed Candidates
//!
//! A candidate is one `u64`: the `f32` distance bits in the high half, the
//! cluster index in the low half. Non-negative floats order like their bit
//! patterns, so
//!
//! ```text
//! pack(d1, c1) < pack(d2, c2)  ⇔  d1 < d2  ∨  (d1 = d2 ∧ c1 < c2)
//! ```
//!
//! which is exactly "strictly smaller distance, lowest index on ties". The
//! racing strategy commits with `AtomicU64::fetch_min`, so the read of the
//! committed value and the write of a better one can never be torn apart by
//! another worker. Both strategies compare packed words, so they agree bit for
//! bit.
//!
//! # History
//!
//! With history enabled the tracker keeps the current and the previous
//! assignment. A pass writes into the buffer holding the stale snapshot, then
//! the two are swapped. The very first pass is copied into both buffers: every
//! sample gets a real assignment on that pass, and comparing against the
//! zero-filled buffer would report spurious changes on the first convergence
//! check.

use super::distance::l1_distance;
use crate::error::{Error, Result};
use ndarray::ArrayView2;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest supported cluster count (the index lives in 32 bits of a candidate).
pub const MAX_CLUSTERS: usize = u32::MAX as usize;

// Sentinel compares greater than every packed real candidate.
const NO_CANDIDATE: u64 = u64::MAX;

/// Parallelization scheme of an assignment pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignStrategy {
    /// Parallel over samples; disjoint ownership, no atomics.
    #[default]
    PerSample,
    /// Parallel over (cluster, sample) pairs; atomic `fetch_min` commits.
    ///
    /// Exposes more parallelism when K is large relative to M.
    CrossCluster,
}

#[inline]
fn pack(distance: f32, cluster: usize) -> u64 {
    (u64::from(distance.to_bits()) << 32) | (cluster as u64 & 0xFFFF_FFFF)
}

#[inline]
fn unpack_cluster(word: u64) -> usize {
    (word & 0xFFFF_FFFF) as usize
}

#[inline]
fn unpack_distance(word: u64) -> f32 {
    if word == NO_CANDIDATE {
        f32::MAX
    } else {
        f32::from_bits((word >> 32) as u32)
    }
}

/// Per-sample nearest-centroid assignments plus the convergence snapshot.
#[derive(Debug)]
pub struct AssignmentTracker {
    /// Assignment written by the most recent pass.
    current: Vec<usize>,
    /// Assignment from the pass before; `None` when history is disabled.
    previous: Option<Vec<usize>>,
    /// Best packed candidate per sample (scratch, reused every pass).
    best: Vec<AtomicU64>,
    strategy: AssignStrategy,
    passes: usize,
    /// Whether `best` holds distances from a pass run by this tracker.
    measured: bool,
}

impl AssignmentTracker {
    /// Allocate buffers for `n_samples` samples.
    ///
    /// With `track_history` off only the current assignment is kept and
    /// [`modification_rate`](Self::modification_rate) returns `None`.
    pub fn new(n_samples: usize, track_history: bool) -> Self {
        Self {
            current: vec![0; n_samples],
            previous: track_history.then(|| vec![0; n_samples]),
            best: (0..n_samples).map(|_| AtomicU64::new(NO_CANDIDATE)).collect(),
            strategy: AssignStrategy::default(),
            passes: 0,
            measured: false,
        }
    }

    /// Build a tracker from two known assignment vectors.
    ///
    /// The tracker behaves as if at least two passes had already run, but it
    /// holds no distances until its own first pass.
    pub fn from_history(current: Vec<usize>, previous: Vec<usize>) -> Result<Self> {
        if current.len() != previous.len() {
            return Err(Error::DimensionMismatch {
                expected: current.len(),
                found: previous.len(),
            });
        }
        let n = current.len();
        Ok(Self {
            current,
            previous: Some(previous),
            best: (0..n).map(|_| AtomicU64::new(NO_CANDIDATE)).collect(),
            strategy: AssignStrategy::default(),
            passes: 2,
            measured: false,
        })
    }

    /// Set the parallelization scheme.
    pub fn with_strategy(mut self, strategy: AssignStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Number of samples tracked.
    pub fn n_samples(&self) -> usize {
        self.current.len()
    }

    /// Active parallelization scheme.
    pub fn strategy(&self) -> AssignStrategy {
        self.strategy
    }

    /// Whether the previous assignment is kept.
    pub fn tracks_history(&self) -> bool {
        self.previous.is_some()
    }

    /// Number of assignment passes performed.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Assignment from the most recent pass.
    pub fn current(&self) -> &[usize] {
        &self.current
    }

    /// Consume the tracker, keeping the most recent assignment.
    pub fn into_current(self) -> Vec<usize> {
        self.current
    }

    /// Assignment from the pass before the most recent one.
    pub fn previous(&self) -> Option<&[usize]> {
        self.previous.as_deref()
    }

    /// Distance from each sample to its assigned centroid.
    ///
    /// `f32::MAX` for every sample until this tracker has run a pass.
    pub fn best_distances(&self) -> Vec<f32> {
        self.best
            .iter()
            .map(|w| unpack_distance(w.load(Ordering::Relaxed)))
            .collect()
    }

    /// Total L1 distance of all samples to their assigned centroids.
    ///
    /// `0.0` until this tracker has run a pass.
    pub fn cost(&self) -> f64 {
        if !self.measured {
            return 0.0;
        }
        self.best
            .iter()
            .map(|w| f64::from(unpack_distance(w.load(Ordering::Relaxed))))
            .sum()
    }

    /// Assign every sample (column of the D×M `samples`) to its nearest
    /// centroid (column of the D×K `centroids`).
    ///
    /// Inputs are validated before any buffer is written. Centroids must be
    /// finite: a NaN distance has no place in the packed ordering.
    pub fn assign(
        &mut self,
        samples: ArrayView2<'_, f32>,
        centroids: ArrayView2<'_, f32>,
    ) -> Result<()> {
        if samples.nrows() != centroids.nrows() {
            return Err(Error::DimensionMismatch {
                expected: samples.nrows(),
                found: centroids.nrows(),
            });
        }
        if samples.ncols() != self.current.len() {
            return Err(Error::DimensionMismatch {
                expected: self.current.len(),
                found: samples.ncols(),
            });
        }
        if centroids.ncols() == 0 {
            return Err(Error::InvalidClusterCount {
                requested: 0,
                n_items: samples.ncols(),
            });
        }
        if centroids.ncols() > MAX_CLUSTERS {
            return Err(Error::InvalidParameter {
                name: "k",
                message: "cluster index must fit in 32 bits",
            });
        }
        if !centroids.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "centroids",
                message: "must be finite",
            });
        }

        let Self {
            current,
            previous,
            best,
            strategy,
            passes,
            measured,
        } = self;

        // First pass (or no history): write the current buffer directly.
        // Later passes overwrite the stale snapshot, then rotate.
        let target: &mut Vec<usize> = match previous.as_mut() {
            Some(prev) if *passes > 0 => prev,
            _ => &mut *current,
        };

        match strategy {
            AssignStrategy::PerSample => assign_per_sample(samples, centroids, target, best),
            AssignStrategy::CrossCluster => {
                assign_cross_cluster(samples, centroids, target, best)
            }
        }

        if let Some(prev) = previous.as_mut() {
            if *passes == 0 {
                prev.par_iter_mut()
                    .zip(current.par_iter())
                    .for_each(|(p, &c)| *p = c);
            } else {
                std::mem::swap(current, prev);
            }
        }
        *passes += 1;
        *measured = true;
        Ok(())
    }

    /// Fraction of samples whose assignment differs between the two most
    /// recent passes, in `[0, 1]`.
    ///
    /// `None` when history is not tracked.
    pub fn modification_rate(&self) -> Option<f64> {
        let previous = self.previous.as_ref()?;
        if self.current.is_empty() {
            return Some(0.0);
        }
        let differing = self
            .current
            .par_iter()
            .zip(previous.par_iter())
            .filter(|(a, b)| a != b)
            .count();
        Some(differing as f64 / self.current.len() as f64)
    }
}

fn assign_per_sample(
    samples: ArrayView2<'_, f32>,
    centroids: ArrayView2<'_, f32>,
    target: &mut [usize],
    best: &mut [AtomicU64],
) {
    let k = centroids.ncols();
    target
        .par_iter_mut()
        .zip(best.par_iter_mut())
        .enumerate()
        .for_each(|(i, (slot, word))| {
            let sample = samples.column(i);
            let mut winner = pack(l1_distance(sample, centroids.column(0)), 0);
            for c in 1..k {
                let candidate = pack(l1_distance(sample, centroids.column(c)), c);
                if candidate < winner {
                    winner = candidate;
                }
            }
            *word.get_mut() = winner;
            *slot = unpack_cluster(winner);
        });
}

fn assign_cross_cluster(
    samples: ArrayView2<'_, f32>,
    centroids: ArrayView2<'_, f32>,
    target: &mut [usize],
    best: &mut [AtomicU64],
) {
    best.par_iter_mut()
        .for_each(|word| *word.get_mut() = NO_CANDIDATE);

    let m = samples.ncols();
    let k = centroids.ncols();
    let best: &[AtomicU64] = best;

    (0..k).into_par_iter().for_each(|c| {
        let centroid = centroids.column(c);
        (0..m).into_par_iter().for_each(|i| {
            let candidate = pack(l1_distance(samples.column(i), centroid), c);
            // The load only filters; fetch_min is the commit.
            if candidate < best[i].load(Ordering::Relaxed) {
                best[i].fetch_min(candidate, Ordering::Relaxed);
            }
        });
    });

    target
        .par_iter_mut()
        .zip(best.par_iter())
        .for_each(|(slot, word)| *slot = unpack_cluster(word.load(Ordering::Relaxed)));
}
