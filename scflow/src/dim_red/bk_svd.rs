#![allow(non_snake_case)]

use super::{Pca, PcaResult, SpectralInput};
use anyhow::{format_err, Error};
use ndarray::{s, Array2};
use ndarray_linalg::svddc::JobSvd;
use ndarray_linalg::{SVDDCInto, QR};
use pulse::Monitor;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Based on "Randomized Block Krylov Methods for Stronger and Faster
/// Approximate Singular Value Decomposition", Musco & Musco, NIPS 2015
/// <https://papers.nips.cc/paper/5735-randomized-block-krylov-methods-for-stronger-and-faster-approximate-singular-value-decomposition.pdf>
pub struct BkSvd {
    /// Multiple of the requested k to use as block size in randomized
    /// projections, must be >= 1.0
    pub k_multiplier: f64,

    /// Number of power iterations to perform
    pub n_iter: usize,

    /// Seed for the random projection block
    pub seed: u64,
}

impl BkSvd {
    /// Create a new BkSvd with default settings.
    pub fn new() -> BkSvd {
        BkSvd {
            k_multiplier: 2.0,
            n_iter: 5,
            seed: 0,
        }
    }
}

impl Default for BkSvd {
    fn default() -> Self {
        Self::new()
    }
}

impl Pca for BkSvd {
    fn run_pca_monitored(
        &self,
        matrix: &impl SpectralInput,
        k: usize,
        monitor: impl Monitor,
    ) -> Result<PcaResult, Error> {
        let bsize = (k as f64 * self.k_multiplier).ceil() as usize;
        svd_bk(matrix, k, bsize, self.n_iter, self.seed, monitor)
    }
}

/// Perform an SVD of `A`, making a rank `k` approximation with block size
/// `b >= k` and `n_iter` power iterations.
pub fn svd_bk(
    A: &impl SpectralInput,
    k: usize,
    b: usize,
    n_iter: usize,
    seed: u64,
    mut monitor: impl Monitor,
) -> Result<PcaResult, Error> {
    let [m, n] = A.shape();

    if m < 2 || n < 2 {
        return Err(format_err!("the input matrix must be at least 2x2"));
    }

    if k == 0 || k > std::cmp::min(m, n) {
        return Err(format_err!("invalid k: {}", k));
    }

    let b = b.clamp(k, std::cmp::min(m, n));

    let mut rng = SmallRng::seed_from_u64(seed);
    let unif = Uniform::new(-1.0, 1.0);

    // Build the Krylov basis in the column space: each round applies
    // A^T A to the block and re-orthogonalizes.
    let mut block = Array2::from_shape_simple_fn((n, b), || unif.sample(&mut rng));
    let mut krylov = Array2::<f64>::zeros((n, b * n_iter));

    for i in 0..n_iter {
        block = A.tdot(&A.dot(&block.view()).view()).qr()?.0;
        krylov.slice_mut(s![.., i * b..(i + 1) * b]).assign(&block);
        monitor.tick(i as f64 / n_iter as f64 * 0.8)?;
    }

    let Q = krylov.qr()?.0;
    monitor.tick(0.85)?;

    // Project, decompose the small factor, and rotate back.
    let T = A.dot(&Q.view());
    monitor.tick(0.93)?;

    let svd = T.svddc_into(JobSvd::Some)?;
    let U = svd.0.expect("JobSvd::Some returns u").slice(s![.., ..k]).to_owned();
    let sigma = svd.1.slice(s![..k]).to_owned();
    let Vt = svd.2.expect("JobSvd::Some returns vt").slice(s![..k, ..]).to_owned();

    let V = Q.dot(&Vt.t());
    monitor.tick(1.0)?;

    Ok((U, sigma, V))
}
