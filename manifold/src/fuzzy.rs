use ndarray::{ArrayView1, ArrayView2};
use sprs::{CsMat, TriMat};

const SMOOTH_TOLERANCE: f64 = 1e-5;
const MIN_SCALE: f64 = 1e-3;
const BISECT_ITER: usize = 64;

/// Build the fuzzy simplicial set from a kNN table.
///
/// Distances are smoothed per point so that roughly `log2(k)` neighbors
/// carry weight (`sigma` from bisection, `rho` the distance to the nearest
/// neighbor), converted to membership strengths, and combined across
/// directions with the probabilistic t-conorm `A + A^T - A o A^T`.
pub fn fuzzy_simplicial_set(knn_indices: &ArrayView2<u32>, knn_distances: &ArrayView2<f64>) -> CsMat<f64> {
    let (n_points, _) = knn_indices.dim();
    let (sigmas, rhos) = smooth_knn_distances(knn_distances);

    let mut tri = TriMat::with_capacity((n_points, n_points), knn_indices.len());
    for i in 0..n_points {
        for (&nbr, &d) in knn_indices.row(i).iter().zip(knn_distances.row(i).iter()) {
            let strength = if d <= rhos[i] || sigmas[i] == 0.0 {
                1.0
            } else {
                (-(d - rhos[i]) / sigmas[i]).exp()
            };
            tri.add_triplet(i, nbr as usize, strength);
        }
    }
    let directed = tri.to_csr();
    let transpose = directed.transpose_view().to_csr();

    let product = sprs::binop::mul_mat_same_storage(&directed, &transpose);
    let sum = &directed + &transpose;
    &sum - &product
}

/// Per-point `(sigma, rho)`: `rho` is the nearest nonzero neighbor
/// distance, `sigma` the bandwidth making the smoothed neighbor count hit
/// `log2(k)`.
pub fn smooth_knn_distances(knn_distances: &ArrayView2<f64>) -> (Vec<f64>, Vec<f64>) {
    let (n_points, k) = knn_distances.dim();
    let mut sigmas = vec![0.0; n_points];
    let mut rhos = vec![0.0; n_points];

    let grand_mean = knn_distances.iter().sum::<f64>() / (n_points * k).max(1) as f64;

    for i in 0..n_points {
        let row = knn_distances.row(i);
        rhos[i] = row
            .iter()
            .copied()
            .filter(|&d| d > 0.0)
            .fold(f64::INFINITY, f64::min);
        if !rhos[i].is_finite() {
            rhos[i] = 0.0;
        }

        sigmas[i] = bisect_sigma(row, rhos[i], k);

        // keep the bandwidth away from degenerate zero
        let row_mean = row.iter().sum::<f64>() / k as f64;
        let floor = if rhos[i] > 0.0 {
            MIN_SCALE * row_mean
        } else {
            MIN_SCALE * grand_mean
        };
        if sigmas[i] < floor {
            sigmas[i] = floor;
        }
    }
    (sigmas, rhos)
}

fn bisect_sigma(distances: ArrayView1<f64>, rho: f64, k: usize) -> f64 {
    let target = (k as f64).log2();
    let mut lo = 0.0;
    let mut mid = 1.0;
    let mut hi = f64::MAX;

    for _ in 0..BISECT_ITER {
        let sum: f64 = distances
            .iter()
            .map(|&d| (-((d - rho).max(0.0) / mid)).exp())
            .sum();
        if (sum - target).abs() < SMOOTH_TOLERANCE {
            break;
        }
        if sum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi == f64::MAX { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }
    mid
}
