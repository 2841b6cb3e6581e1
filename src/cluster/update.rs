//! Centroid update: each centroid moves to the mean of its assigned samples.
//!
//! ```text
//! μ_c = (1 / |C_c|) Σ_{i : a_i = c} x_i       if |C_c| > 0
//! μ_c unchanged                               if |C_c| = 0
//! ```
//!
//! Empty clusters are neither reseeded nor dropped; they keep their previous
//! coordinates bit for bit.
//!
//! # Reduction
//!
//! Samples are split into fixed-size blocks. Each block accumulates a private
//! D×K partial sum in `f64`; cluster counts go through shared atomic counters
//! since any sample may land in any cluster. Blocks are processed in groups of
//! [`BLOCKS_PER_GROUP`], and each group's partials are added to the running sum
//! in block order before the next group starts, so at most one group of
//! partials is alive at a time. Neither size depends on the number of
//! workers, so the floating-point summation order (and therefore every
//! centroid bit) is the same for one thread or many.
//!
//! Sums stay in `f64` until the final division, so large finite coordinates
//! do not overflow and counts above 2^24 are exact.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Samples per accumulation block.
const BLOCK_SIZE: usize = 4096;

/// Blocks reduced together before folding into the running sum.
const BLOCKS_PER_GROUP: usize = 64;

/// Recompute `centroids` (D×K) from `samples` (D×M) and one cluster index
/// per sample. Returns the number of samples assigned to each cluster.
///
/// All inputs are validated first; on error the centroids are untouched.
pub fn update_centroids(
    samples: ArrayView2<'_, f32>,
    assignments: &[usize],
    centroids: &mut Array2<f32>,
) -> Result<Vec<usize>> {
    let d = samples.nrows();
    let k = centroids.ncols();

    if centroids.nrows() != d {
        return Err(Error::DimensionMismatch {
            expected: d,
            found: centroids.nrows(),
        });
    }
    if assignments.len() != samples.ncols() {
        return Err(Error::DimensionMismatch {
            expected: samples.ncols(),
            found: assignments.len(),
        });
    }
    if assignments.par_iter().any(|&c| c >= k) {
        return Err(Error::InvalidParameter {
            name: "assignments",
            message: "cluster index out of range",
        });
    }

    let counts: Vec<AtomicUsize> = (0..k).map(|_| AtomicUsize::new(0)).collect();

    let mut sums = Array2::<f64>::zeros((d, k));
    let group_len = BLOCK_SIZE * BLOCKS_PER_GROUP;
    for (group, group_assignments) in assignments.chunks(group_len).enumerate() {
        let group_start = group * group_len;
        let partials: Vec<Array2<f64>> = group_assignments
            .par_chunks(BLOCK_SIZE)
            .enumerate()
            .map(|(block, chunk)| {
                let start = group_start + block * BLOCK_SIZE;
                let mut partial = Array2::<f64>::zeros((d, k));
                for (offset, &c) in chunk.iter().enumerate() {
                    partial
                        .column_mut(c)
                        .zip_mut_with(&samples.column(start + offset), |s, &x| {
                            *s += f64::from(x)
                        });
                    counts[c].fetch_add(1, Ordering::Relaxed);
                }
                partial
            })
            .collect();

        for partial in &partials {
            sums += partial;
        }
    }

    let counts: Vec<usize> = counts.into_iter().map(AtomicUsize::into_inner).collect();
    for (c, &count) in counts.iter().enumerate() {
        if count == 0 {
            trace!(cluster = c, "empty cluster keeps previous centroid");
            continue;
        }
        let n = count as f64;
        centroids
            .column_mut(c)
            .zip_mut_with(&sums.column(c), |dst, &s| *dst = (s / n) as f32);
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::prelude::*;

    #[test]
    fn test_mean_of_assigned_samples() {
        let samples = array![[0.0f32, 2.0, 10.0, 12.0, 14.0], [1.0, 3.0, 5.0, 5.0, 5.0]];
        let assignments = [0, 0, 1, 1, 1];
        let mut centroids = Array2::<f32>::zeros((2, 2));

        let counts = update_centroids(samples.view(), &assignments, &mut centroids).unwrap();

        assert_eq!(counts, vec![2, 3]);
        assert_eq!(centroids, array![[1.0f32, 12.0], [2.0, 5.0]]);
    }

    #[test]
    fn test_empty_cluster_is_bit_identical() {
        let samples = array![[0.0f32, 1.0, 2.0], [0.0, 1.0, 2.0]];
        let assignments = [0, 0, 2];
        let mut centroids = array![[0.5f32, 1.0e-7 / 3.0, 9.0], [0.5, -0.0, 9.0]];
        let before: Vec<u32> = centroids.column(1).iter().map(|x| x.to_bits()).collect();

        let counts = update_centroids(samples.view(), &assignments, &mut centroids).unwrap();

        assert_eq!(counts, vec![2, 0, 1]);
        let after: Vec<u32> = centroids.column(1).iter().map(|x| x.to_bits()).collect();
        assert_eq!(before, after);
        assert_eq!(centroids.column(2).to_vec(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_idempotent_with_unchanged_assignments() {
        let mut rng = StdRng::seed_from_u64(3);
        let samples = Array2::from_shape_fn((4, 500), |_| rng.random_range(-5.0f32..5.0));
        let assignments: Vec<usize> = (0..500).map(|i| (i * 7) % 6).collect();
        let mut centroids = Array2::<f32>::zeros((4, 6));

        update_centroids(samples.view(), &assignments, &mut centroids).unwrap();
        let first = centroids.clone();
        update_centroids(samples.view(), &assignments, &mut centroids).unwrap();

        assert_eq!(first, centroids);
    }

    #[test]
    fn test_identical_across_thread_counts() {
        let mut rng = StdRng::seed_from_u64(99);
        let m = 3 * BLOCK_SIZE + 17;
        let samples = Array2::from_shape_fn((3, m), |_| rng.random_range(-100.0f32..100.0));
        let assignments: Vec<usize> = (0..m).map(|_| rng.random_range(0..5)).collect();

        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap();
            let mut centroids = Array2::<f32>::zeros((3, 5));
            let counts = pool
                .install(|| update_centroids(samples.view(), &assignments, &mut centroids))
                .unwrap();
            (centroids, counts)
        };

        let (c1, n1) = run(1);
        let (c4, n4) = run(4);
        assert_eq!(n1, n4);
        assert_eq!(n1.iter().sum::<usize>(), m);
        let bits = |a: &Array2<f32>| a.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&c1), bits(&c4));
    }

    #[test]
    fn test_matches_f64_reference_across_blocks() {
        let mut rng = StdRng::seed_from_u64(5);
        let m = 2 * BLOCK_SIZE + 1;
        let samples = Array2::from_shape_fn((2, m), |_| rng.random_range(0.0f32..1.0));
        let assignments: Vec<usize> = (0..m).map(|i| i % 3).collect();
        let mut centroids = Array2::<f32>::zeros((2, 3));

        update_centroids(samples.view(), &assignments, &mut centroids).unwrap();

        for c in 0..3 {
            for r in 0..2 {
                let members: Vec<f64> = (0..m)
                    .filter(|&i| assignments[i] == c)
                    .map(|i| f64::from(samples[[r, i]]))
                    .collect();
                let mean = members.iter().sum::<f64>() / members.len() as f64;
                assert!((f64::from(centroids[[r, c]]) - mean).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_large_coordinates_do_not_overflow() {
        let samples = array![[3e38f32, 3e38], [-3e38, f32::MAX]];
        let mut centroids = Array2::<f32>::zeros((2, 1));

        update_centroids(samples.view(), &[0, 0], &mut centroids).unwrap();

        assert_eq!(centroids[[0, 0]], 3e38);
        assert!(centroids[[1, 0]].is_finite());
        assert!(centroids[[1, 0]] > 0.0);
    }

    #[test]
    fn test_identical_across_thread_counts_over_several_groups() {
        let mut rng = StdRng::seed_from_u64(12);
        let m = 2 * BLOCK_SIZE * BLOCKS_PER_GROUP + 3 * BLOCK_SIZE + 1;
        let samples = Array2::from_shape_fn((2, m), |_| rng.random_range(-1.0f32..1.0));
        let assignments: Vec<usize> = (0..m).map(|i| (i / 7) % 4).collect();

        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap();
            let mut centroids = Array2::<f32>::zeros((2, 4));
            let counts = pool
                .install(|| update_centroids(samples.view(), &assignments, &mut centroids))
                .unwrap();
            (centroids, counts)
        };

        let (c1, n1) = run(1);
        let (c3, n3) = run(3);
        assert_eq!(n1, n3);
        assert_eq!(n1.iter().sum::<usize>(), m);
        let bits = |a: &Array2<f32>| a.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&c1), bits(&c3));
    }

    #[test]
    fn test_out_of_range_assignment_leaves_centroids() {
        let samples = array![[0.0f32, 1.0]];
        let mut centroids = array![[3.0f32, 4.0]];
        let err = update_centroids(samples.view(), &[0, 2], &mut centroids).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "assignments", .. }));
        assert_eq!(centroids, array![[3.0f32, 4.0]]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let samples = array![[0.0f32, 1.0], [0.0, 1.0]];
        let mut centroids = array![[3.0f32, 4.0]];
        assert_eq!(
            update_centroids(samples.view(), &[0, 1], &mut centroids).unwrap_err(),
            Error::DimensionMismatch {
                expected: 2,
                found: 1
            }
        );

        let mut centroids = array![[3.0f32], [4.0]];
        assert_eq!(
            update_centroids(samples.view(), &[0, 0, 0], &mut centroids).unwrap_err(),
            Error::DimensionMismatch {
                expected: 2,
                found: 3
            }
        );
    }
}
