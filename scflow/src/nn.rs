use log::info;
use ndarray::parallel::prelude::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use ndarray::{Array2, ArrayView2, Axis};

/// Compute the `k` nearest neighbors of each row in `v`, using Euclidean
/// distance. Returns indices and distances, each `rows x k`, neighbors
/// ordered nearest-first. Ties break on the lower index so results are
/// deterministic.
pub fn knn_with_distances(v: &ArrayView2<f64>, k: usize) -> (Array2<u32>, Array2<f64>) {
    let (cells, _) = v.dim();
    assert!(
        k >= 1 && k < cells,
        "k = {k} must be in [1, {cells}) for {cells} points"
    );

    info!("searching {} neighbors among {} points", k, cells);
    let mut indices = Array2::<u32>::zeros((cells, k));
    let mut distances = Array2::<f64>::zeros((cells, k));

    indices
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(distances.axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .for_each(|(cell, (mut idx_out, mut dist_out))| {
            let me = v.row(cell);
            let mut candidates: Vec<(f64, usize)> = (0..cells)
                .filter(|&other| other != cell)
                .map(|other| {
                    let d = me
                        .iter()
                        .zip(v.row(other).iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f64>();
                    (d, other)
                })
                .collect();
            candidates.select_nth_unstable_by(k - 1, |a, b| {
                a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
            });
            candidates.truncate(k);
            candidates.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            for (j, (d, other)) in candidates.into_iter().enumerate() {
                idx_out[j] = other as u32;
                dist_out[j] = d.sqrt();
            }
        });

    (indices, distances)
}

/// The `k` nearest neighbor indices of each row in `v`.
pub fn knn(v: &ArrayView2<f64>, k: usize) -> Array2<u32> {
    knn_with_distances(v, k).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_distr::Normal;
    use rand_pcg::Pcg64Mcg;

    // Reference n^2 implementation with the same tie-breaking
    fn reference_knn(v: &ArrayView2<f64>, k: usize) -> Array2<u32> {
        let cells = v.shape()[0];
        let mut output = Array2::zeros((cells, k));
        for cell in 0..cells {
            let mut nns: Vec<(f64, usize)> = (0..cells)
                .filter(|&o| o != cell)
                .map(|o| {
                    let d = v
                        .row(cell)
                        .iter()
                        .zip(v.row(o).iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f64>();
                    (d, o)
                })
                .collect();
            nns.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            for i in 0..k {
                output[(cell, i)] = nns[i].1 as u32;
            }
        }
        output
    }

    #[test]
    fn test_knn_matches_reference() {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        for &cells in &[3usize, 5, 50, 100] {
            for &d in &[1usize, 2, 5, 20] {
                let dist = Normal::new(0.0f64, 1.0f64).unwrap();
                let v = Array2::<f64>::random_using((cells, d), dist, &mut rng);
                let full = reference_knn(&v.view(), cells.min(26) - 1);
                for &k in &[1usize, 5, 25] {
                    if k >= cells {
                        continue;
                    }
                    let fast = knn(&v.view(), k);
                    assert_eq!(fast, full.slice(s![.., 0..k]).to_owned());
                }
            }
        }
    }

    #[test]
    fn test_distances_sorted() {
        let mut rng = Pcg64Mcg::seed_from_u64(42);
        let dist = Normal::new(0.0f64, 1.0f64).unwrap();
        let v = Array2::<f64>::random_using((40, 3), dist, &mut rng);
        let (_, distances) = knn_with_distances(&v.view(), 10);
        for row in distances.axis_iter(Axis(0)) {
            for w in row.as_slice().unwrap().windows(2) {
                assert!(w[0] <= w[1]);
            }
        }
    }

    #[test]
    fn test_degenerate_points() {
        // equally distant points with one outlier; still deterministic
        let mut v = Array2::<f64>::eye(5);
        v[(0, 4)] = 3.0f64;
        let got = knn(&v.view(), 4);
        let correct = ndarray::arr2(&[
            [4u32, 1, 2, 3],
            [2, 3, 4, 0],
            [1, 3, 4, 0],
            [1, 2, 4, 0],
            [1, 2, 3, 0],
        ]);
        assert_eq!(got, correct);
    }
}
