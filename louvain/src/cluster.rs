use std::collections::HashMap;

/// Node-to-cluster assignment with a dense label space `0..num_clusters`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Clustering {
    labels: Vec<usize>,
    n_clusters: usize,
}

impl Clustering {
    /// One cluster per node
    pub fn singletons(n_nodes: usize) -> Clustering {
        Clustering {
            labels: (0..n_nodes).collect(),
            n_clusters: n_nodes,
        }
    }

    /// Wrap explicit labels; every label must be below `n_clusters`.
    pub fn from_labels(labels: Vec<usize>, n_clusters: usize) -> Clustering {
        debug_assert!(labels.iter().all(|&l| l < n_clusters));
        Clustering { labels, n_clusters }
    }

    /// Number of nodes
    pub fn nodes(&self) -> usize {
        self.labels.len()
    }

    /// Number of clusters
    pub fn num_clusters(&self) -> usize {
        self.n_clusters
    }

    /// Cluster of `node`
    pub fn get(&self, node: usize) -> usize {
        self.labels[node]
    }

    /// Move `node` to `cluster`
    pub fn set(&mut self, node: usize, cluster: usize) {
        self.labels[node] = cluster;
        if cluster >= self.n_clusters {
            self.n_clusters = cluster + 1;
        }
    }

    /// Underlying labels
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Renumber labels to remove empty clusters, preserving order of first
    /// appearance by cluster id.
    pub fn compact(&mut self) {
        let mut sizes = vec![0usize; self.n_clusters];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        let mut remap = vec![usize::MAX; self.n_clusters];
        let mut next = 0;
        for (old, &sz) in sizes.iter().enumerate() {
            if sz > 0 {
                remap[old] = next;
                next += 1;
            }
        }
        for l in self.labels.iter_mut() {
            *l = remap[*l];
        }
        self.n_clusters = next;
    }

    /// Push an aggregate-level clustering down onto this one: node `i`'s
    /// cluster becomes the aggregate cluster of its current cluster.
    pub fn apply_merge(&mut self, aggregate: &Clustering) {
        for l in self.labels.iter_mut() {
            *l = aggregate.get(*l);
        }
        self.n_clusters = aggregate.num_clusters();
    }

    /// Convert to `i16` labels renumbered from largest cluster to smallest,
    /// so cluster 0 is always the biggest. Ties break on the lower original
    /// label.
    pub fn relabel_by_size(&self) -> Vec<i16> {
        let mut sizes = vec![0usize; self.n_clusters];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        let mut order: Vec<usize> = (0..self.n_clusters).collect();
        order.sort_unstable_by_key(|&c| (std::cmp::Reverse(sizes[c]), c));
        let remap: HashMap<usize, i16> = order
            .into_iter()
            .enumerate()
            .map(|(new, old)| (old, new as i16))
            .collect();
        self.labels.iter().map(|l| remap[l]).collect()
    }
}
