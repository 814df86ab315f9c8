//! Hierarchical tree over cluster centroids.
//!
//! After graph clustering, the clusters themselves get organized into a
//! dendrogram: centroids in PC space, condensed Euclidean distances, and
//! agglomerative linkage. The tree is what viewers draw next to heatmaps
//! and what the k-cut reads cluster super-groups from.

use anyhow::{bail, Error};
use itertools::Itertools;
pub use kodama::Method as LinkageMethod;
use kodama::{linkage, Dendrogram};
use ndarray::{Array2, ArrayView2};
use petgraph::unionfind::UnionFind;
use std::collections::HashMap;

/// One agglomeration step of the dendrogram.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergeStep {
    /// First merged node (leaves are `0..n`, internal nodes follow)
    pub a: usize,
    /// Second merged node
    pub b: usize,
    /// Cophenetic distance of the merge
    pub height: f64,
    /// Number of leaves under the merged node
    pub size: usize,
}

/// Dendrogram over cluster centroids.
pub struct ClusterTree {
    dendrogram: Dendrogram<f64>,
}

/// Per-cluster centroids of `coords` (cells x dims): the coordinate-wise
/// median of member cells, robust to stragglers. Clusters are `0..n_clusters`
/// as labeled in `labels`; empty clusters get a zero centroid.
pub fn cluster_centroids(coords: &ArrayView2<f64>, labels: &[i16], n_clusters: usize) -> Array2<f64> {
    assert_eq!(coords.nrows(), labels.len());
    let dims = coords.ncols();
    let mut centroids = Array2::<f64>::zeros((n_clusters, dims));
    for cluster in 0..n_clusters {
        let members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l == cluster as i16)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            continue;
        }
        for d in 0..dims {
            let mut vals: Vec<f64> = members.iter().map(|&i| coords[[i, d]]).collect();
            vals.sort_unstable_by(f64::total_cmp);
            let mid = vals.len() / 2;
            centroids[[cluster, d]] = if vals.len() % 2 == 0 {
                (vals[mid - 1] + vals[mid]) / 2.0
            } else {
                vals[mid]
            };
        }
    }
    centroids
}

impl ClusterTree {
    /// Agglomerate centroids (rows of `centroids`) with the given linkage
    /// method over Euclidean distances. Needs at least two centroids.
    pub fn build(centroids: &ArrayView2<f64>, method: LinkageMethod) -> Result<ClusterTree, Error> {
        let n = centroids.nrows();
        if n < 2 {
            bail!("need at least two clusters to build a tree, got {}", n);
        }
        let mut condensed = Vec::with_capacity(n * (n - 1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let d = centroids
                    .row(i)
                    .iter()
                    .zip(centroids.row(j).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                condensed.push(d);
            }
        }
        let dendrogram = linkage(&mut condensed, n, method);
        Ok(ClusterTree { dendrogram })
    }

    /// Number of leaves
    pub fn observations(&self) -> usize {
        self.dendrogram.observations()
    }

    /// The merge steps in agglomeration order.
    pub fn merges(&self) -> Vec<MergeStep> {
        self.dendrogram
            .steps()
            .iter()
            .map(|s| MergeStep {
                a: s.cluster1,
                b: s.cluster2,
                height: s.dissimilarity,
                size: s.size,
            })
            .collect()
    }

    /// Leaves in left-to-right dendrogram order, lower-numbered child first.
    pub fn leaves(&self) -> Vec<usize> {
        let n = self.observations();
        let mut order = Vec::with_capacity(n);
        self.collect_leaves(2 * n - 2, &mut order);
        order
    }

    fn collect_leaves(&self, node: usize, out: &mut Vec<usize>) {
        let n = self.observations();
        if node < n {
            out.push(node);
            return;
        }
        let step = &self.dendrogram.steps()[node - n];
        let (left, right) = if step.cluster1 < step.cluster2 {
            (step.cluster1, step.cluster2)
        } else {
            (step.cluster2, step.cluster1)
        };
        self.collect_leaves(left, out);
        self.collect_leaves(right, out);
    }

    /// Cut the tree into `k` groups, returning a leaf-to-group labeling
    /// with consecutive labels starting at 0 in order of first appearance.
    pub fn cut(&self, k: usize) -> Vec<usize> {
        let n = self.observations();
        if k <= 1 {
            return vec![0; n];
        }
        if k >= n {
            return (0..n).collect();
        }
        // merge the n - k lowest steps
        let mut uf = UnionFind::<usize>::new(n);
        let mut steps: Vec<(f64, usize, usize)> = self
            .dendrogram
            .steps()
            .iter()
            .map(|s| (s.dissimilarity, s.cluster1, s.cluster2))
            .collect();
        steps.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
        let mut reps: Vec<usize> = (0..2 * n - 1).collect();
        for (i, s) in self.dendrogram.steps().iter().enumerate() {
            // representative leaf of each internal node, for union on steps
            reps[n + i] = reps[s.cluster1];
        }
        for &(_, c1, c2) in steps.iter().take(n - k) {
            uf.union(reps[c1], reps[c2]);
        }
        relabel(&(0..n).map(|i| uf.find(i)).collect_vec())
    }
}

/// Renumber arbitrary labels to consecutive integers from 0 in order of
/// first appearance. `[5, 3, 5, 10]` maps to `[0, 1, 0, 2]`.
fn relabel(input: &[usize]) -> Vec<usize> {
    let mapping: HashMap<_, _> = input.iter().unique().enumerate().map(|(i, v)| (v, i)).collect();
    input.iter().map(|x| mapping[x]).collect_vec()
}
