use centra::{ClusteringState, L1Kmeans, Termination};
use ndarray::Array2;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

/// Two isotropic 2D blobs centered at (0, 0) and (10, 10), one column per sample.
fn two_blobs(per_blob: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0f32, 0.5).unwrap();
    let centers = [(0.0f32, 0.0f32), (10.0, 10.0)];

    let mut samples = Array2::zeros((2, 2 * per_blob));
    for (b, &(cx, cy)) in centers.iter().enumerate() {
        for j in 0..per_blob {
            let i = b * per_blob + j;
            samples[[0, i]] = cx + noise.sample(&mut rng);
            samples[[1, i]] = cy + noise.sample(&mut rng);
        }
    }
    samples
}

fn euclidean(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[test]
fn test_two_blobs_recovered() {
    let per_blob = 500;
    let samples = two_blobs(per_blob, 2024);

    // Uniform initialization can park both centroids on one blob; keep the
    // cheapest of a few seeded runs.
    let best = (0..10u64)
        .map(|seed| {
            let mut state = L1Kmeans::new(2)
                .with_seed(seed)
                .with_threads(4)
                .init(samples.view())
                .unwrap();
            let termination = state.run(20, None).unwrap();
            assert_eq!(termination, Termination::MaxIterations { iterations: 20 });
            state
        })
        .min_by(|a, b| a.cost().total_cmp(&b.cost()))
        .unwrap();

    assert_eq!(best.iterations_performed(), 20);
    assert!(best.assignments().iter().all(|&a| a < 2));

    let centroids = best.centroids();
    let recovered: Vec<(f32, f32)> = (0..2)
        .map(|c| (centroids[[0, c]], centroids[[1, c]]))
        .collect();
    for target in [(0.0f32, 0.0f32), (10.0, 10.0)] {
        let nearest = recovered
            .iter()
            .map(|&c| euclidean(c, target))
            .fold(f32::INFINITY, f32::min);
        assert!(nearest < 1.0, "no centroid near {target:?}: {recovered:?}");
    }

    let labels = best.assignments();
    let first = labels[0];
    assert!(labels[..per_blob].iter().all(|&l| l == first));
    assert!(labels[per_blob..].iter().all(|&l| l != first));
    assert_eq!(best.cluster_sizes(), &[per_blob, per_blob]);
}

#[test]
fn test_pipeline_identical_for_one_and_many_workers() {
    let samples = two_blobs(3000, 7);
    let fit = |threads: usize| {
        L1Kmeans::new(3)
            .with_seed(5)
            .with_threads(threads)
            .with_max_iter(12)
            .fit(samples.view())
            .unwrap()
    };

    let single = fit(1);
    let many = fit(8);
    assert_eq!(single.labels, many.labels);
    assert_eq!(single.cluster_sizes, many.cluster_sizes);
    let bits = |a: &Array2<f32>| a.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&single.centroids), bits(&many.centroids));
}

#[test]
fn test_threshold_stops_before_cap() {
    let samples = two_blobs(200, 11);
    let mut state = L1Kmeans::new(2)
        .with_seed(3)
        .with_threads(2)
        .init(samples.view())
        .unwrap();

    // Two clean blobs settle quickly: the rate reaches zero well before 50.
    match state.run(50, Some(1e-6)).unwrap() {
        Termination::Converged {
            iterations,
            modification_rate,
        } => {
            assert!(iterations < 50);
            assert_eq!(modification_rate, 0.0);
            assert_eq!(state.previous_assignments(), Some(state.assignments()));
        }
        other => panic!("expected convergence, got {other:?}"),
    }
}

#[test]
fn test_single_iteration_cap() {
    let samples = two_blobs(50, 1);
    let mut state = ClusteringState::new(samples.view(), 2, true, 3).unwrap();
    let termination = state.run(1, Some(0.5)).unwrap();

    assert_eq!(termination, Termination::MaxIterations { iterations: 1 });
    assert_eq!(state.iterations_performed(), 1);
    assert!(state.assignments().iter().all(|&a| a < 2));
}

#[test]
fn test_history_disabled_runs_to_cap() {
    let samples = two_blobs(50, 1);
    let mut state = ClusteringState::new(samples.view(), 2, false, 2).unwrap();
    assert_eq!(state.run(7, None).unwrap().iterations(), 7);
    assert_eq!(state.modification_rate(), None);
    assert_eq!(state.previous_assignments(), None);

    // Without history there is no rate, so a threshold cannot stop the run.
    assert_eq!(
        state.run(12, Some(0.5)).unwrap(),
        Termination::MaxIterations { iterations: 12 }
    );
}
