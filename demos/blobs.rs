//! L1 k-means on a synthetic 3D mixture of four Gaussian classes.
//!
//! Run with `cargo run --release --example blobs`.

use centra::L1Kmeans;
use ndarray::Array2;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // (mean, std) per class and per axis.
    let classes: [[(f64, f64); 3]; 4] = [
        [(1.0, 0.5), (2.0, 0.6), (3.0, 0.4)],
        [(2.0, 0.8), (1.0, 0.7), (1.0, 0.5)],
        [(4.0, 1.2), (2.0, 0.3), (2.0, 0.8)],
        [(3.0, 0.3), (1.0, 0.5), (4.0, 0.4)],
    ];
    let per_class = 25_000;

    let mut rng = StdRng::seed_from_u64(7);
    let mut samples = Array2::<f32>::zeros((3, classes.len() * per_class));
    for (c, axes) in classes.iter().enumerate() {
        for (r, &(mean, std)) in axes.iter().enumerate() {
            let normal = Normal::new(mean, std)?;
            for j in 0..per_class {
                samples[[r, c * per_class + j]] = normal.sample(&mut rng) as f32;
            }
        }
    }

    let start = Instant::now();
    let fit = L1Kmeans::new(4)
        .with_threads(4)
        .with_seed(1)
        .with_max_iter(50)
        .with_threshold(1e-5)
        .fit(samples.view())?;
    let elapsed = start.elapsed();

    println!("k-means time: {:.3}s", elapsed.as_secs_f64());
    println!("k-means iterations: {} (converged: {})", fit.iterations, fit.converged);
    for (axis, row) in ["x", "y", "z"].iter().zip(fit.centroids.rows()) {
        println!("centroids_{axis} = {row}");
    }
    println!("cluster sizes: {:?}", fit.cluster_sizes);

    Ok(())
}
