use crate::{Clustering, Graph};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Default resolution
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Louvain modularity optimization: local moving on the current graph, then
/// recursion on the cluster-aggregated graph until nothing moves.
pub struct Louvain {
    resolution: f64,
    rng: ChaCha20Rng,
}

impl Louvain {
    /// Initialize with a modularity resolution and an optional random seed
    /// (seed 0 when unspecified).
    pub fn new(resolution: f64, seed: Option<u64>) -> Louvain {
        Louvain {
            resolution,
            rng: ChaCha20Rng::seed_from_u64(seed.unwrap_or_default()),
        }
    }

    /// Cluster the graph, returning compact labels.
    pub fn cluster(&mut self, graph: &Graph) -> Clustering {
        let mut clustering = Clustering::singletons(graph.nodes());
        self.iterate(graph, &mut clustering);
        clustering.compact();
        clustering
    }

    /// One full level: local moving, then recursion on the aggregate graph.
    /// Returns true if any label changed.
    pub fn iterate(&mut self, graph: &Graph, clustering: &mut Clustering) -> bool {
        let mut update = self.local_moving(graph, clustering);
        clustering.compact();

        if clustering.num_clusters() == graph.nodes() {
            return update;
        }

        let reduced = graph.aggregate(clustering);
        let mut reduced_clustering = Clustering::singletons(reduced.nodes());
        update |= self.iterate(&reduced, &mut reduced_clustering);
        clustering.apply_merge(&reduced_clustering);

        update
    }

    /// Sweep nodes in random order, greedily moving each to the neighboring
    /// cluster with the largest modularity gain, until a full sweep moves
    /// nothing.
    fn local_moving(&mut self, graph: &Graph, clustering: &mut Clustering) -> bool {
        let n = graph.nodes();
        if n == 0 {
            return false;
        }
        let two_m = 2.0 * graph.total_weight();
        if two_m == 0.0 {
            return false;
        }

        let mut cluster_weights = vec![0f64; n];
        for node in 0..n {
            cluster_weights[clustering.get(node)] += graph.node_weight(node);
        }

        let mut node_order: Vec<usize> = (0..n).collect();
        node_order.shuffle(&mut self.rng);

        // scratch: per-cluster edge weight from the node under consideration
        let mut edge_to_cluster = vec![0f64; n];
        let mut touched: Vec<usize> = Vec::new();

        let mut any_update = false;
        loop {
            let mut moved_this_sweep = false;
            for &node in &node_order {
                let current = clustering.get(node);
                let k_node = graph.node_weight(node);
                cluster_weights[current] -= k_node;

                touched.clear();
                for (other, w) in graph.neighbors(node) {
                    let c = clustering.get(other);
                    if edge_to_cluster[c] == 0.0 {
                        touched.push(c);
                    }
                    edge_to_cluster[c] += w;
                }

                // staying put must compete on equal terms
                let mut best_cluster = current;
                let mut best_gain = edge_to_cluster[current]
                    - self.resolution * k_node * cluster_weights[current] / two_m;
                for &c in &touched {
                    let gain =
                        edge_to_cluster[c] - self.resolution * k_node * cluster_weights[c] / two_m;
                    if gain > best_gain || (gain == best_gain && c < best_cluster) {
                        best_gain = gain;
                        best_cluster = c;
                    }
                }
                for &c in &touched {
                    edge_to_cluster[c] = 0.0;
                }

                cluster_weights[best_cluster] += k_node;
                if best_cluster != current {
                    clustering.set(node, best_cluster);
                    moved_this_sweep = true;
                    any_update = true;
                }
            }
            if !moved_this_sweep {
                break;
            }
        }

        any_update
    }
}
