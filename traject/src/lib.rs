//! Trajectory inference over a minimum spanning tree of cluster centroids.
//!
//! Clusters become tree nodes in PC space, the complete centroid graph is
//! reduced to its MST, and every cell is projected onto the nearest tree
//! edge. Pseudotime is the distance from a root node to the projection,
//! measured along the tree; the edge a cell lands on is its branch.

use anyhow::{bail, Error};
use ctree::cluster_centroids;
use log::info;
use ndarray::parallel::prelude::{IntoParallelIterator, ParallelIterator};
use ndarray::{Array2, ArrayView1, ArrayView2};
use petgraph::algo::min_spanning_tree;
use petgraph::data::FromElements;
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::VecDeque;

/// Options for trajectory inference.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrajectoryOptions {
    /// Root cluster for pseudotime zero; `None` picks the largest cluster
    pub root_cluster: Option<i16>,
}

/// An inferred trajectory.
#[derive(Clone, Debug)]
pub struct Trajectory {
    /// Distance from the root along the tree, per cell
    pub pseudotime: Vec<f64>,
    /// Index into `edges` of the branch each cell projects onto
    pub branch: Vec<u16>,
    /// Backbone edges as (parent, child) cluster pairs, oriented away from
    /// the root
    pub edges: Vec<(usize, usize)>,
    /// Cluster centroid positions in the input space
    pub node_positions: Array2<f64>,
    /// The root cluster
    pub root: usize,
}

/// Infer a trajectory from per-cell coordinates (cells x dims, typically
/// PC space) and cluster labels `0..n_clusters`.
pub fn infer(
    coords: &ArrayView2<f64>,
    labels: &[i16],
    n_clusters: usize,
    options: &TrajectoryOptions,
) -> Result<Trajectory, Error> {
    if coords.nrows() != labels.len() {
        bail!(
            "coordinate rows {} do not match {} labels",
            coords.nrows(),
            labels.len()
        );
    }
    if n_clusters == 0 {
        bail!("no clusters to build a trajectory from");
    }

    let mut sizes = vec![0usize; n_clusters];
    for &l in labels {
        if l >= 0 {
            sizes[l as usize] += 1;
        }
    }
    let root = match options.root_cluster {
        Some(c) => {
            if c < 0 || c as usize >= n_clusters {
                bail!("root cluster {} out of range", c);
            }
            c as usize
        }
        None => sizes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(i, _)| i)
            .expect("n_clusters > 0"),
    };

    let centroids = cluster_centroids(coords, labels, n_clusters);

    if n_clusters == 1 {
        // degenerate tree: order cells by distance from the lone centroid
        let pseudotime: Vec<f64> = (0..coords.nrows())
            .map(|c| euclidean(coords.row(c), centroids.row(0)))
            .collect();
        return Ok(Trajectory {
            pseudotime,
            branch: vec![0; coords.nrows()],
            edges: Vec::new(),
            node_positions: centroids,
            root,
        });
    }

    // MST over the complete centroid graph
    let mut complete = UnGraph::<(), f64>::new_undirected();
    for _ in 0..n_clusters {
        complete.add_node(());
    }
    for i in 0..n_clusters {
        for j in (i + 1)..n_clusters {
            let d = euclidean(centroids.row(i), centroids.row(j));
            complete.add_edge(NodeIndex::new(i), NodeIndex::new(j), d);
        }
    }
    let mst: UnGraph<(), f64> = UnGraph::from_elements(min_spanning_tree(&complete));

    // orient edges away from the root and accumulate node times
    let mut node_time = vec![f64::INFINITY; n_clusters];
    let mut edges: Vec<(usize, usize)> = Vec::with_capacity(n_clusters - 1);
    node_time[root] = 0.0;
    let mut queue = VecDeque::from([root]);
    while let Some(u) = queue.pop_front() {
        for v in mst.neighbors(NodeIndex::new(u)) {
            let v = v.index();
            if node_time[v].is_infinite() {
                let w = mst
                    .edge_weight(mst.find_edge(NodeIndex::new(u), NodeIndex::new(v)).expect("tree edge"))
                    .copied()
                    .expect("weighted edge");
                node_time[v] = node_time[u] + w;
                edges.push((u, v));
                queue.push_back(v);
            }
        }
    }
    info!(
        "trajectory backbone: {} nodes, {} edges, root {}",
        n_clusters,
        edges.len(),
        root
    );

    // project every cell onto its nearest backbone edge
    let results: Vec<(f64, u16)> = (0..coords.nrows())
        .into_par_iter()
        .map(|cell| {
            let point = coords.row(cell);
            let mut best = (f64::INFINITY, 0.0, 0usize);
            for (edge_id, &(u, v)) in edges.iter().enumerate() {
                let (dist, frac) = project_to_segment(point, centroids.row(u), centroids.row(v));
                if dist < best.0 {
                    best = (dist, frac, edge_id);
                }
            }
            let (u, v) = edges[best.2];
            let along = best.1 * (node_time[v] - node_time[u]);
            (node_time[u] + along, best.2 as u16)
        })
        .collect();

    Ok(Trajectory {
        pseudotime: results.iter().map(|&(t, _)| t).collect(),
        branch: results.iter().map(|&(_, b)| b).collect(),
        edges,
        node_positions: centroids,
        root,
    })
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Distance from `p` to segment `a..b` and the clamped projection fraction.
fn project_to_segment(p: ArrayView1<f64>, a: ArrayView1<f64>, b: ArrayView1<f64>) -> (f64, f64) {
    let mut dot = 0.0;
    let mut len_sq = 0.0;
    for ((&pi, &ai), &bi) in p.iter().zip(a.iter()).zip(b.iter()) {
        dot += (pi - ai) * (bi - ai);
        len_sq += (bi - ai) * (bi - ai);
    }
    let frac = if len_sq > 0.0 {
        (dot / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut dist_sq = 0.0;
    for ((&pi, &ai), &bi) in p.iter().zip(a.iter()).zip(b.iter()) {
        let proj = ai + frac * (bi - ai);
        dist_sq += (pi - proj) * (pi - proj);
    }
    (dist_sq.sqrt(), frac)
}
