use anyhow::{bail, Error};
use log::info;
use ndarray::parallel::prelude::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const BISECT_ITER: usize = 50;
const MOMENTUM_SWITCH_ITER: usize = 250;

/// Exact t-SNE over dense coordinates (van der Maaten & Hinton 2008).
///
/// O(n^2) in cells; fine for the tens of thousands of cells a pipeline run
/// carries, and free of the approximation knobs of tree-based variants.
pub struct Tsne {
    /// Target perplexity of the conditional distributions
    pub perplexity: f64,
    /// Output dimensions (2 or 3)
    pub dims: usize,
    /// Gradient descent iterations
    pub n_iter: usize,
    /// Learning rate (eta)
    pub learning_rate: f64,
    /// Multiplier on affinities during the first 250 iterations
    pub early_exaggeration: f64,
    /// RNG seed for the initial layout
    pub seed: u64,
}

impl Default for Tsne {
    fn default() -> Self {
        Tsne {
            perplexity: 30.0,
            dims: 2,
            n_iter: 1000,
            learning_rate: 200.0,
            early_exaggeration: 12.0,
            seed: 0,
        }
    }
}

impl Tsne {
    /// Embed `data` (cells x components) into `dims` dimensions.
    pub fn embed(&self, data: &ArrayView2<f64>) -> Result<Array2<f64>, Error> {
        let n = data.nrows();
        if self.dims < 1 || self.dims > 3 {
            bail!("t-SNE output dims must be 1..=3, got {}", self.dims);
        }
        if n < 4 {
            bail!("t-SNE needs at least 4 points, got {n}");
        }
        if 3.0 * self.perplexity >= n as f64 {
            bail!(
                "perplexity {} too large for {} points",
                self.perplexity,
                n
            );
        }

        info!("computing pairwise affinities for {n} points");
        let p = self.joint_affinities(data);

        let mut rng = Pcg64Mcg::seed_from_u64(self.seed);
        let mut y = Array2::from_shape_simple_fn((n, self.dims), || rng.gen::<f64>() * 2e-4 - 1e-4);
        let mut velocity = Array2::<f64>::zeros((n, self.dims));
        let mut gains = Array2::<f64>::ones((n, self.dims));

        info!("running {} gradient iterations", self.n_iter);
        for iter in 0..self.n_iter {
            let exaggeration = if iter < MOMENTUM_SWITCH_ITER {
                self.early_exaggeration
            } else {
                1.0
            };
            let momentum = if iter < MOMENTUM_SWITCH_ITER { 0.5 } else { 0.8 };

            // student-t numerators and normalizer
            let mut num = Array2::<f64>::zeros((n, n));
            num.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(i, mut row)| {
                    for j in 0..n {
                        if i != j {
                            let mut d = 0.0;
                            for k in 0..self.dims {
                                let diff = y[[i, k]] - y[[j, k]];
                                d += diff * diff;
                            }
                            row[j] = 1.0 / (1.0 + d);
                        }
                    }
                });
            let z: f64 = num.sum();

            let mut grad = Array2::<f64>::zeros((n, self.dims));
            grad.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(i, mut grad_row)| {
                    for j in 0..n {
                        if i == j {
                            continue;
                        }
                        let q = (num[[i, j]] / z).max(1e-12);
                        let mult = (exaggeration * p[[i, j]] - q) * num[[i, j]];
                        for k in 0..self.dims {
                            grad_row[k] += 4.0 * mult * (y[[i, k]] - y[[j, k]]);
                        }
                    }
                });

            // adaptive gains, as in the reference implementation
            for ((&g, v), gain) in grad.iter().zip(velocity.iter_mut()).zip(gains.iter_mut()) {
                *gain = if (g > 0.0) == (*v > 0.0) {
                    (*gain * 0.8).max(0.01)
                } else {
                    *gain + 0.2
                };
                *v = momentum * *v - self.learning_rate * *gain * g;
            }
            y += &velocity;

            // keep the layout centered
            let means = y.mean_axis(Axis(0)).expect("nonempty");
            for mut row in y.axis_iter_mut(Axis(0)) {
                row -= &means;
            }
        }

        Ok(y)
    }

    /// Symmetrized joint affinities with per-point bandwidths calibrated to
    /// the target perplexity.
    fn joint_affinities(&self, data: &ArrayView2<f64>) -> Array2<f64> {
        let n = data.nrows();
        let mut sq_dists = Array2::<f64>::zeros((n, n));
        sq_dists
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                for j in 0..n {
                    if i != j {
                        row[j] = data
                            .row(i)
                            .iter()
                            .zip(data.row(j).iter())
                            .map(|(a, b)| (a - b) * (a - b))
                            .sum();
                    }
                }
            });

        let log_perp = self.perplexity.ln();
        let mut p = Array2::<f64>::zeros((n, n));
        p.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                let mut beta = 1.0;
                let mut beta_min = f64::NEG_INFINITY;
                let mut beta_max = f64::INFINITY;

                for _ in 0..BISECT_ITER {
                    let mut sum = 0.0;
                    let mut weighted = 0.0;
                    for j in 0..n {
                        if i != j {
                            let w = (-beta * sq_dists[[i, j]]).exp();
                            sum += w;
                            weighted += beta * sq_dists[[i, j]] * w;
                        }
                    }
                    let sum = sum.max(f64::MIN_POSITIVE);
                    let entropy = sum.ln() + weighted / sum;

                    let diff = entropy - log_perp;
                    if diff.abs() < PERPLEXITY_TOLERANCE {
                        break;
                    }
                    if diff > 0.0 {
                        beta_min = beta;
                        beta = if beta_max.is_infinite() {
                            beta * 2.0
                        } else {
                            (beta + beta_max) / 2.0
                        };
                    } else {
                        beta_max = beta;
                        beta = if beta_min.is_infinite() {
                            beta / 2.0
                        } else {
                            (beta + beta_min) / 2.0
                        };
                    }
                }

                let mut sum = 0.0;
                for j in 0..n {
                    if i != j {
                        let w = (-beta * sq_dists[[i, j]]).exp();
                        row[j] = w;
                        sum += w;
                    }
                }
                let sum = sum.max(f64::MIN_POSITIVE);
                for j in 0..n {
                    row[j] /= sum;
                }
            });

        // symmetrize and normalize to a joint distribution
        let pt = p.t().to_owned();
        let mut joint = &p + &pt;
        joint /= 2.0 * n as f64;
        joint.mapv_inplace(|v| v.max(1e-12));
        joint
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::s;
    use ndarray_rand::RandomExt;
    use rand_distr::Normal;

    fn two_blobs(per_blob: usize, sep: f64, seed: u64) -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let dist = Normal::new(0.0f64, 1.0f64).unwrap();
        let mut data = Array2::<f64>::random_using((2 * per_blob, 5), dist, &mut rng);
        for i in 0..per_blob {
            data[[i, 0]] += sep;
        }
        data
    }

    fn separation(embedding: &Array2<f64>, per_blob: usize) -> (f64, f64) {
        let n = embedding.nrows();
        let mut intra = (0.0, 0usize);
        let mut inter = (0.0, 0usize);
        for i in 0..n {
            for j in (i + 1)..n {
                let d: f64 = embedding
                    .row(i)
                    .iter()
                    .zip(embedding.row(j).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                if (i < per_blob) == (j < per_blob) {
                    intra.0 += d;
                    intra.1 += 1;
                } else {
                    inter.0 += d;
                    inter.1 += 1;
                }
            }
        }
        (intra.0 / intra.1 as f64, inter.0 / inter.1 as f64)
    }

    #[test]
    fn test_separates_blobs() {
        let data = two_blobs(30, 25.0, 1);
        let embedding = Tsne {
            perplexity: 10.0,
            n_iter: 300,
            ..Tsne::default()
        }
        .embed(&data.view())
        .unwrap();
        assert_eq!(embedding.shape(), &[60, 2]);
        let (intra, inter) = separation(&embedding, 30);
        assert!(
            inter > 2.0 * intra,
            "blobs not separated: intra {intra}, inter {inter}"
        );
    }

    #[test]
    fn test_deterministic() {
        let data = two_blobs(15, 10.0, 3);
        let cfg = Tsne {
            perplexity: 5.0,
            n_iter: 50,
            ..Tsne::default()
        };
        let a = cfg.embed(&data.view()).unwrap();
        let b = cfg.embed(&data.view()).unwrap();
        assert!(a.abs_diff_eq(&b, 0.0));
    }

    #[test]
    fn test_three_dims() {
        let data = two_blobs(10, 10.0, 4);
        let embedding = Tsne {
            perplexity: 5.0,
            n_iter: 20,
            dims: 3,
            ..Tsne::default()
        }
        .embed(&data.view())
        .unwrap();
        assert_eq!(embedding.shape(), &[20, 3]);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let data = two_blobs(10, 5.0, 0);
        assert!(Tsne {
            perplexity: 10.0,
            ..Tsne::default()
        }
        .embed(&data.view().slice(s![0..4, ..]))
        .is_err());
        assert!(Tsne {
            dims: 4,
            ..Tsne::default()
        }
        .embed(&data.view())
        .is_err());
    }
}
