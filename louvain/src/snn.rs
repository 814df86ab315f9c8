use crate::Graph;
use log::info;
use ndarray::ArrayView2;
use rayon::prelude::*;

/// Default pruning cutoff for SNN edge weights, as a Jaccard index.
pub const DEFAULT_PRUNE: f64 = 1.0 / 15.0;

/// Build the shared-nearest-neighbor graph from a kNN table (`cells x k`,
/// self excluded). Every cell is connected to its neighbors with the
/// Jaccard index of their neighborhoods (self included on both sides);
/// edges below `prune` are dropped.
pub fn shared_nearest_neighbors(knn: &ArrayView2<u32>, prune: f64) -> Graph {
    let (cells, k) = knn.dim();

    // neighborhoods as sorted arrays including the cell itself
    let hoods: Vec<Vec<u32>> = (0..cells)
        .map(|i| {
            let mut h: Vec<u32> = knn.row(i).iter().copied().collect();
            h.push(i as u32);
            h.sort_unstable();
            h
        })
        .collect();

    let edges: Vec<(u32, u32, f64)> = (0..cells)
        .into_par_iter()
        .flat_map_iter(|i| {
            let hoods = &hoods;
            knn.row(i)
                .iter()
                .filter(move |&&j| (j as usize) > i)
                .filter_map(move |&j| {
                    let shared = sorted_intersection(&hoods[i], &hoods[j as usize]);
                    let union = 2 * (k + 1) - shared;
                    let jaccard = shared as f64 / union as f64;
                    (jaccard >= prune).then_some((i as u32, j, jaccard))
                })
                .collect::<Vec<_>>()
                .into_iter()
        })
        .collect();

    info!(
        "SNN graph: {} cells, {} edges above prune {:.4}",
        cells,
        edges.len(),
        prune
    );
    Graph::from_edges(cells, &edges)
}

fn sorted_intersection(a: &[u32], b: &[u32]) -> usize {
    let (mut i, mut j, mut count) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}
