use crate::{curve, fuzzy};
use anyhow::{bail, Error};
use log::info;
use ndarray::{Array2, ArrayView2};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sprs::CsMat;

/// UMAP embedding (McInnes, Healy & Melville 2018).
///
/// Neighbor search is exact, the optimizer is the sequential reference
/// formulation, and every random choice is seeded, so a fixed configuration
/// reproduces its layout bit-for-bit.
pub struct Umap {
    /// Neighborhood size for the fuzzy simplicial set
    pub n_neighbors: usize,
    /// Minimum separation of points in the layout
    pub min_dist: f64,
    /// Scale of the embedded cloud
    pub spread: f64,
    /// Optimization epochs; `None` picks 500 (small) or 200 (large) inputs
    pub n_epochs: Option<usize>,
    /// Initial SGD learning rate
    pub learning_rate: f64,
    /// Negative samples drawn per positive sample
    pub negative_sample_rate: usize,
    /// Weight on repulsive updates
    pub repulsion_strength: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for Umap {
    fn default() -> Self {
        Umap {
            n_neighbors: 30,
            min_dist: 0.3,
            spread: 1.0,
            n_epochs: None,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            repulsion_strength: 1.0,
            seed: 0,
        }
    }
}

struct EdgeSchedule {
    head: Vec<usize>,
    tail: Vec<usize>,
    epochs_per_sample: Vec<f64>,
}

impl Umap {
    /// Embed `data` (cells x components) into `dims` dimensions.
    pub fn embed(&self, data: &ArrayView2<f64>, dims: usize) -> Result<Array2<f64>, Error> {
        let n = data.nrows();
        if dims < 1 || dims > 3 {
            bail!("UMAP output dims must be 1..=3, got {dims}");
        }
        if self.n_neighbors < 2 || self.n_neighbors >= n {
            bail!(
                "n_neighbors {} out of range for {} points",
                self.n_neighbors,
                n
            );
        }

        let (knn_indices, knn_distances) = scflow::nn::knn_with_distances(data, self.n_neighbors);
        let graph = fuzzy::fuzzy_simplicial_set(&knn_indices.view(), &knn_distances.view());

        let n_epochs = self.n_epochs.unwrap_or(if n <= 10_000 { 500 } else { 200 });
        let (a, b) = curve::fit_ab(self.spread, self.min_dist)?;
        info!("UMAP curve fit: a = {a:.4}, b = {b:.4}, {n_epochs} epochs");

        let mut rng = SmallRng::seed_from_u64(self.seed);
        let schedule = build_schedule(&graph, n_epochs as f64, &mut rng);

        let mut embedding =
            Array2::from_shape_simple_fn((n, dims), || rng.gen::<f64>() * 20.0 - 10.0);
        self.optimize(&mut embedding, &schedule, n_epochs, a, b, &mut rng);
        Ok(embedding)
    }

    /// Sequential SGD over the sampled edges; positions update in place, so
    /// later samples within an epoch see earlier moves.
    fn optimize(
        &self,
        embedding: &mut Array2<f64>,
        schedule: &EdgeSchedule,
        n_epochs: usize,
        a: f64,
        b: f64,
        rng: &mut SmallRng,
    ) {
        let n = embedding.nrows();
        let dims = embedding.ncols();
        let gamma = self.repulsion_strength;

        let epochs_per_negative_sample: Vec<f64> = schedule
            .epochs_per_sample
            .iter()
            .map(|&e| e / self.negative_sample_rate as f64)
            .collect();
        let mut epoch_of_next_sample = schedule.epochs_per_sample.clone();
        let mut epoch_of_next_negative_sample = epochs_per_negative_sample.clone();

        let mut alpha = self.learning_rate;
        for epoch in 0..n_epochs {
            for i in 0..schedule.head.len() {
                if epoch_of_next_sample[i] > epoch as f64 {
                    continue;
                }
                let j = schedule.head[i];
                let k = schedule.tail[i];

                let dist_sq = sq_dist(embedding, j, k, dims);
                let grad_coeff = if dist_sq > 0.0 {
                    (-2.0 * a * b * dist_sq.powf(b - 1.0)) / (1.0 + a * dist_sq.powf(b))
                } else {
                    0.0
                };
                for d in 0..dims {
                    let grad_d = (grad_coeff * (embedding[[j, d]] - embedding[[k, d]])).clamp(-4.0, 4.0);
                    embedding[[j, d]] += grad_d * alpha;
                    embedding[[k, d]] -= grad_d * alpha;
                }
                epoch_of_next_sample[i] += schedule.epochs_per_sample[i];

                let n_neg = ((epoch as f64 - epoch_of_next_negative_sample[i])
                    / epochs_per_negative_sample[i])
                    .floor();
                for _ in 0..n_neg as isize {
                    let other = rng.gen_range(0..n);
                    if other == j {
                        continue;
                    }
                    let dist_sq = sq_dist(embedding, j, other, dims);
                    let grad_coeff = if dist_sq > 0.0 {
                        (2.0 * gamma * b) / ((1e-3 + dist_sq) * (1.0 + a * dist_sq.powf(b)))
                    } else {
                        0.0
                    };
                    for d in 0..dims {
                        let grad_d = if grad_coeff > 0.0 {
                            (grad_coeff * (embedding[[j, d]] - embedding[[other, d]])).clamp(-4.0, 4.0)
                        } else {
                            4.0
                        };
                        embedding[[j, d]] += grad_d * alpha;
                    }
                }
                epoch_of_next_negative_sample[i] += n_neg * epochs_per_negative_sample[i];
            }
            alpha = self.learning_rate * (1.0 - (epoch as f64 + 1.0) / n_epochs as f64);
        }
    }
}

#[inline]
fn sq_dist(embedding: &Array2<f64>, j: usize, k: usize, dims: usize) -> f64 {
    let mut d = 0.0;
    for i in 0..dims {
        let diff = embedding[[j, i]] - embedding[[k, i]];
        d += diff * diff;
    }
    d
}

/// Turn the fuzzy graph into an edge sampling schedule: weak edges (below
/// `max_weight / n_epochs`) are dropped, the rest are sampled inversely to
/// their weight. The edge list is shuffled once so epoch order carries no
/// structure.
fn build_schedule(graph: &CsMat<f64>, n_epochs: f64, rng: &mut impl Rng) -> EdgeSchedule {
    let max_weight = graph.iter().fold(0.0f64, |acc, (&w, _)| acc.max(w));
    let cutoff = max_weight / n_epochs;

    let mut head = Vec::new();
    let mut tail = Vec::new();
    let mut weights = Vec::new();
    for (&w, (row, col)) in graph.iter() {
        if w >= cutoff && w > 0.0 {
            head.push(col);
            tail.push(row);
            weights.push(w);
        }
    }

    // Fisher-Yates over the three arrays together
    for i in (1..head.len()).rev() {
        let swap = rng.gen_range(0..=i);
        head.swap(i, swap);
        tail.swap(i, swap);
        weights.swap(i, swap);
    }

    let epochs_per_sample = weights.iter().map(|&w| max_weight / w).collect();
    EdgeSchedule {
        head,
        tail,
        epochs_per_sample,
    }
}
