use crate::cluster::Clustering;
use fxhash::FxHashMap;

/// Weighted undirected graph in adjacency-array form.
///
/// Node weights are the summed weights of incident edges (the degree term
/// modularity needs) and are preserved by [`Graph::aggregate`], so the
/// modularity denominator stays that of the original graph at every level.
#[derive(Clone, Debug)]
pub struct Graph {
    offsets: Vec<usize>,
    targets: Vec<u32>,
    weights: Vec<f64>,
    node_weights: Vec<f64>,
}

impl Graph {
    /// Build from unique undirected edges `(i, j, w)` with `i != j`.
    /// Duplicate pairs are summed.
    pub fn from_edges(n_nodes: usize, edges: &[(u32, u32, f64)]) -> Graph {
        let mut merged: FxHashMap<(u32, u32), f64> = FxHashMap::default();
        for &(i, j, w) in edges {
            assert!(i != j, "self-edges are not allowed");
            let key = if i < j { (i, j) } else { (j, i) };
            *merged.entry(key).or_insert(0.0) += w;
        }

        let mut degree = vec![0usize; n_nodes];
        for &(i, j) in merged.keys() {
            degree[i as usize] += 1;
            degree[j as usize] += 1;
        }
        let mut offsets = Vec::with_capacity(n_nodes + 1);
        offsets.push(0);
        for n in 0..n_nodes {
            offsets.push(offsets[n] + degree[n]);
        }

        let mut cursor = offsets.clone();
        let mut targets = vec![0u32; offsets[n_nodes]];
        let mut weights = vec![0f64; offsets[n_nodes]];
        let mut node_weights = vec![0f64; n_nodes];
        for (&(i, j), &w) in merged.iter() {
            for (a, b) in [(i, j), (j, i)] {
                targets[cursor[a as usize]] = b;
                weights[cursor[a as usize]] = w;
                cursor[a as usize] += 1;
            }
            node_weights[i as usize] += w;
            node_weights[j as usize] += w;
        }

        // deterministic neighbor order regardless of hash-map iteration
        for n in 0..n_nodes {
            let span = offsets[n]..offsets[n + 1];
            let mut pairs: Vec<(u32, f64)> = targets[span.clone()]
                .iter()
                .copied()
                .zip(weights[span.clone()].iter().copied())
                .collect();
            pairs.sort_unstable_by_key(|&(t, _)| t);
            for (k, (t, w)) in pairs.into_iter().enumerate() {
                targets[offsets[n] + k] = t;
                weights[offsets[n] + k] = w;
            }
        }

        Graph {
            offsets,
            targets,
            weights,
            node_weights,
        }
    }

    /// Build with explicit node weights (used by aggregation).
    fn with_node_weights(n_nodes: usize, edges: &[(u32, u32, f64)], node_weights: Vec<f64>) -> Graph {
        let mut g = Graph::from_edges(n_nodes, edges);
        g.node_weights = node_weights;
        g
    }

    /// Number of nodes
    pub fn nodes(&self) -> usize {
        self.node_weights.len()
    }

    /// Degree-sum weight of `node`
    pub fn node_weight(&self, node: usize) -> f64 {
        self.node_weights[node]
    }

    /// Half the summed node weights: the `m` in the modularity denominator
    pub fn total_weight(&self) -> f64 {
        self.node_weights.iter().sum::<f64>() / 2.0
    }

    /// Iterate `(neighbor, edge_weight)` pairs of `node`
    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let span = self.offsets[node]..self.offsets[node + 1];
        self.targets[span.clone()]
            .iter()
            .zip(self.weights[span].iter())
            .map(|(&t, &w)| (t as usize, w))
    }

    /// Collapse each cluster into one node. Inter-cluster edge weights are
    /// summed; intra-cluster edges vanish from the edge set but remain in
    /// the carried-over node weights.
    pub fn aggregate(&self, clustering: &Clustering) -> Graph {
        let k = clustering.num_clusters();
        let mut node_weights = vec![0f64; k];
        for node in 0..self.nodes() {
            node_weights[clustering.get(node)] += self.node_weights[node];
        }

        let mut merged: FxHashMap<(u32, u32), f64> = FxHashMap::default();
        for node in 0..self.nodes() {
            let c1 = clustering.get(node) as u32;
            for (other, w) in self.neighbors(node) {
                if other <= node {
                    continue;
                }
                let c2 = clustering.get(other) as u32;
                if c1 == c2 {
                    continue;
                }
                let key = if c1 < c2 { (c1, c2) } else { (c2, c1) };
                *merged.entry(key).or_insert(0.0) += w;
            }
        }
        let edges: Vec<(u32, u32, f64)> = merged.into_iter().map(|((a, b), w)| (a, b, w)).collect();
        Graph::with_node_weights(k, &edges, node_weights)
    }
}
