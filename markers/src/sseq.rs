use crate::dist;
use crate::stat::Statistics;
use anyhow::Error;
use ndarray::{arr1, Array1};
use pulse::{Monitor, Silent};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// Default count above which the asymptotic test replaces the exact test
pub static BIG_COUNT_DEFAULT: u64 = 900;
/// Default quantile of method-of-moments dispersions used as shrinkage target
pub static ZETA_QUANTILE_DEFAULT: f64 = 0.995;

/// Global parameters for the sSeq differential expression method
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct SSeqParams {
    /// number of cells the parameters were estimated from
    pub num_cells: u32,
    /// number of genes
    pub num_genes: u32,
    /// per-cell size factors (0 for cells outside the estimation set)
    pub size_factors: Vec<f64>,
    /// per-gene means of size-normalized counts
    pub gene_means: Vec<f64>,
    /// per-gene variances of size-normalized counts
    pub gene_variances: Vec<f64>,
    /// genes with nonzero variance, eligible for testing
    pub use_genes: Vec<bool>,
    /// method-of-moments dispersion estimates
    pub gene_moment_phi: Vec<f64>,
    /// shrinkage target dispersion
    pub zeta_hat: f64,
    /// shrinkage weight toward `zeta_hat`
    pub delta: f64,
    /// shrunken per-gene dispersions
    pub gene_phi: Vec<f64>,
}

/// Result of a pairwise differential expression test
#[derive(Debug)]
pub struct DiffExpResult {
    /// genes eligible for testing
    pub genes_tested: Array1<bool>,
    /// per-gene count sums in condition A
    pub sums_in: Array1<u64>,
    /// per-gene count sums in condition B
    pub sums_out: Array1<u64>,
    /// common means used by the tests
    pub common_mean: Array1<f64>,
    /// common dispersions used by the tests
    pub common_dispersion: Array1<f64>,
    /// size-factor-normalized mean in condition A
    pub normalized_mean_in: Array1<f64>,
    /// size-factor-normalized mean in condition B
    pub normalized_mean_out: Array1<f64>,
    /// per-gene p-values
    pub p_values: Array1<f64>,
    /// Benjamini-Hochberg adjusted p-values (over tested genes)
    pub adjusted_p_values: Array1<f64>,
    /// log2 fold change A over B, with pseudocounts
    pub log2_fold_change: Array1<f64>,
}

/// Per-cell size factors: library sizes scaled to their median. When
/// `cell_indices` is given, only those cells get factors; the rest are 0.
fn size_factors(mat: &CsMat<u32>, cell_indices: Option<&[usize]>) -> Vec<f64> {
    let mut counts_per_cell = vec![0f64; mat.cols()];
    for (_, row) in mat.outer_iterator().enumerate() {
        for (cell, &v) in row.iter() {
            counts_per_cell[cell] += f64::from(v);
        }
    }

    match cell_indices {
        Some(cells) => {
            let selected: Vec<f64> = cells.iter().map(|&c| counts_per_cell[c]).collect();
            let median = selected.median();
            let mut factors = vec![0f64; mat.cols()];
            for &c in cells {
                factors[c] = counts_per_cell[c] / median;
            }
            factors
        }
        None => {
            let median = counts_per_cell.median();
            counts_per_cell.iter().map(|&v| v / median).collect()
        }
    }
}

/// Compute global parameters for the sSeq method: size factors, per-gene
/// moments of size-normalized counts, and dispersions shrunk toward a high
/// quantile of the method-of-moments estimates (Yu et al. 2013).
pub fn compute_sseq_params(
    mat: &CsMat<u32>,
    zeta_quantile: Option<f64>,
    cell_indices: Option<&[usize]>,
) -> SSeqParams {
    let cell_count = cell_indices.map_or(mat.cols(), <[usize]>::len) as f64;
    let gene_count = mat.rows() as f64;
    let size_factors = size_factors(mat, cell_indices);

    let mut in_set = vec![cell_indices.is_none(); mat.cols()];
    if let Some(cells) = cell_indices {
        for &c in cells {
            in_set[c] = true;
        }
    }

    // per-gene mean and variance of v / size_factor over the selected cells
    let mut mean_g = vec![0f64; mat.rows()];
    let mut var_g = vec![0f64; mat.rows()];
    for (gene, row) in mat.outer_iterator().enumerate() {
        let mut sum = 0.0;
        let mut sq_sum = 0.0;
        for (cell, &v) in row.iter() {
            if in_set[cell] && size_factors[cell] > 0.0 {
                let x = f64::from(v) / size_factors[cell];
                sum += x;
                sq_sum += x * x;
            }
        }
        mean_g[gene] = sum / cell_count;
        var_g[gene] = sq_sum / cell_count - mean_g[gene] * mean_g[gene];
    }

    // Method-of-moments dispersion, only meaningful where variance is
    // nonzero
    let use_g: Vec<bool> = var_g.iter().map(|&v| v > 0.0).collect();
    let sum_reciprocal_sf: f64 = size_factors
        .iter()
        .filter(|&&v| v != 0.0)
        .map(|&v| 1.0 / v)
        .sum();

    let mut phi_mm_used = Vec::new();
    let phi_mm_g: Vec<f64> = (0..mat.rows())
        .map(|g| {
            if use_g[g] {
                let phi = 0f64.max(
                    (cell_count * var_g[g] - mean_g[g] * sum_reciprocal_sf)
                        / (mean_g[g] * mean_g[g] * sum_reciprocal_sf),
                );
                phi_mm_used.push(phi);
                phi
            } else {
                0.0
            }
        })
        .collect();

    let (zeta_hat, delta) = if phi_mm_used.is_empty() {
        // variance of all genes was 0
        (0.0, 0.0)
    } else {
        // a high quantile of the MoM dispersions is the shrinkage target,
        // per the rule of thumb in Yu, et al.
        let zeta_hat = phi_mm_used.percentile(100.0 * zeta_quantile.unwrap_or(ZETA_QUANTILE_DEFAULT));
        let mean_phi = phi_mm_used.mean();
        let num: f64 = phi_mm_used.iter().map(|&x| (x - mean_phi) * (x - mean_phi)).sum::<f64>()
            / (gene_count - 1.0);
        let denom: f64 = phi_mm_used.iter().map(|&x| (x - zeta_hat) * (x - zeta_hat)).sum::<f64>()
            / (gene_count - 2.0);
        (zeta_hat, num / denom)
    };

    // interpolate between the MoM estimates and zeta_hat by delta
    let any_positive = phi_mm_used.iter().any(|&x| x > 0.0);
    let gene_phi: Vec<f64> = (0..mat.rows())
        .map(|g| {
            if any_positive && var_g[g] > 0.0 {
                (1.0 - delta) * phi_mm_g[g] + delta * zeta_hat
            } else {
                0.0
            }
        })
        .collect();

    SSeqParams {
        num_cells: cell_count as u32,
        num_genes: gene_count as u32,
        size_factors,
        gene_means: mean_g,
        gene_variances: var_g,
        use_genes: use_g,
        gene_moment_phi: phi_mm_g,
        zeta_hat,
        delta,
        gene_phi,
    }
}

/// Run the sSeq pairwise differential expression test between the cells in
/// `cond_a` and `cond_b`.
pub fn sseq_differential_expression(
    mat: &CsMat<u32>,
    cond_a: &[usize],
    cond_b: &[usize],
    params: &SSeqParams,
    big_count: Option<u64>,
) -> DiffExpResult {
    sseq_differential_expression_monitored(mat, cond_a, cond_b, params, big_count, Silent)
        .expect("silent monitor cannot cancel")
}

/// [`sseq_differential_expression`] with progress reporting and
/// cancellation.
pub fn sseq_differential_expression_monitored(
    mat: &CsMat<u32>,
    cond_a: &[usize],
    cond_b: &[usize],
    params: &SSeqParams,
    big_count: Option<u64>,
    mut monitor: impl Monitor,
) -> Result<DiffExpResult, Error> {
    let big_count = big_count.unwrap_or(BIG_COUNT_DEFAULT);
    let n_genes = mat.rows();

    monitor.tick(0.0)?;

    let size_factor_a: f64 = cond_a.iter().map(|&c| params.size_factors[c]).sum();
    let size_factor_b: f64 = cond_b.iter().map(|&c| params.size_factors[c]).sum();

    let mut in_a = vec![false; mat.cols()];
    for &c in cond_a {
        in_a[c] = true;
    }
    let mut in_b = vec![false; mat.cols()];
    for &c in cond_b {
        in_b[c] = true;
    }

    let mut sums_a = vec![0u64; n_genes];
    let mut sums_b = vec![0u64; n_genes];
    for (gene, row) in mat.outer_iterator().enumerate() {
        for (cell, &v) in row.iter() {
            if in_a[cell] {
                sums_a[gene] += u64::from(v);
            } else if in_b[cell] {
                sums_b[gene] += u64::from(v);
            }
        }
    }
    monitor.tick(0.3)?;

    let p_values: Vec<f64> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            if params.use_genes[g] && sums_a[g] > big_count && sums_b[g] > big_count {
                dist::nb_asymptotic_test(
                    sums_a[g],
                    sums_b[g],
                    size_factor_a,
                    size_factor_b,
                    params.gene_means[g],
                    params.gene_phi[g],
                )
            } else {
                dist::nb_exact_test(
                    sums_a[g],
                    sums_b[g],
                    size_factor_a,
                    size_factor_b,
                    params.gene_means[g],
                    params.gene_phi[g],
                )
            }
        })
        .collect();
    monitor.tick(0.85)?;

    // adjust only the genes that were actually tested
    let tested: Vec<(usize, f64)> = p_values
        .iter()
        .enumerate()
        .filter(|&(g, _)| params.use_genes[g])
        .map(|(g, &p)| (g, p))
        .collect();
    let mut adjusted = p_values.clone();
    for (g, q) in dist::adjusted_pvalue_bh(&tested) {
        adjusted[g] = q;
    }
    monitor.tick(0.95)?;

    let log2_fold_change: Vec<f64> = sums_a
        .iter()
        .zip(sums_b.iter())
        .map(|(&a, &b)| {
            ((1 + a) as f64 / (1.0 + size_factor_a)).log2() - ((1 + b) as f64 / (1.0 + size_factor_b)).log2()
        })
        .collect();

    let normalized_mean_in: Vec<f64> = if size_factor_a == 0.0 {
        vec![0.0; n_genes]
    } else {
        sums_a.iter().map(|&v| v as f64 / size_factor_a).collect()
    };
    let normalized_mean_out: Vec<f64> = if size_factor_b == 0.0 {
        vec![0.0; n_genes]
    } else {
        sums_b.iter().map(|&v| v as f64 / size_factor_b).collect()
    };
    monitor.tick(1.0)?;

    Ok(DiffExpResult {
        genes_tested: arr1(&params.use_genes),
        sums_in: arr1(&sums_a),
        sums_out: arr1(&sums_b),
        common_mean: arr1(&params.gene_means),
        common_dispersion: arr1(&params.gene_phi),
        normalized_mean_in: Array1::from(normalized_mean_in),
        normalized_mean_out: Array1::from(normalized_mean_out),
        p_values: Array1::from(p_values),
        adjusted_p_values: Array1::from(adjusted),
        log2_fold_change: Array1::from(log2_fold_change),
    })
}

#[cfg(test)]
pub mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;
    use sprs::TriMat;

    pub(crate) fn to_sparse(rows: usize, cols: usize, dense: &[Vec<u32>]) -> CsMat<u32> {
        let mut tri = TriMat::new((rows, cols));
        for (r, row) in dense.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                if v > 0 {
                    tri.add_triplet(r, c, v);
                }
            }
        }
        tri.to_csr()
    }

    #[test]
    fn test_size_factors() {
        // column sums 6, 2, 0, 4 with median 3
        let mat = to_sparse(2, 4, &[vec![5, 2, 0, 1], vec![1, 0, 0, 3]]);
        let sf = size_factors(&mat, None);
        assert_eq!(sf, vec![2.0, 2.0 / 3.0, 0.0, 4.0 / 3.0]);
    }

    #[test]
    fn test_size_factors_subset() {
        let mat = to_sparse(2, 4, &[vec![5, 2, 0, 1], vec![1, 0, 0, 3]]);
        // selected columns have sums 6 and 2, median 4
        let sf = size_factors(&mat, Some(&[0, 1]));
        assert_eq!(sf, vec![1.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_params_flat_matrix() {
        // identical cells: every gene has zero variance, nothing is testable
        let mat = to_sparse(3, 4, &[vec![2, 2, 2, 2], vec![5, 5, 5, 5], vec![1, 1, 1, 1]]);
        let params = compute_sseq_params(&mat, None, None);
        assert_eq!(params.num_cells, 4);
        assert!(params.use_genes.iter().all(|&u| !u));
        assert_eq!(params.zeta_hat, 0.0);
        assert!(params.gene_phi.iter().all(|&p| p == 0.0));
    }

    fn simulated_dataset(seed: u64) -> (CsMat<u32>, Vec<usize>, Vec<usize>) {
        // two groups of 40 cells; gene 0 is ~6x higher in group A, the rest
        // are exchangeable
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let cells = 80;
        let genes = 30;
        let mut dense = vec![vec![0u32; cells]; genes];
        for (g, row) in dense.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                let base = rng.gen_range(0..8);
                *v = if g == 0 && c < 40 { base + 30 } else { base };
            }
        }
        let mat = to_sparse(genes, cells, &dense);
        let cond_a: Vec<usize> = (0..40).collect();
        let cond_b: Vec<usize> = (40..80).collect();
        (mat, cond_a, cond_b)
    }

    #[test]
    fn test_differential_expression_finds_the_spike() {
        let (mat, cond_a, cond_b) = simulated_dataset(17);
        let params = compute_sseq_params(&mat, None, None);
        let result = sseq_differential_expression(&mat, &cond_a, &cond_b, &params, None);

        assert!(result.p_values[0] < 1e-6, "spiked gene p = {}", result.p_values[0]);
        assert!(result.log2_fold_change[0] > 1.0);
        // most flat genes stay insignificant after adjustment
        let significant = result
            .adjusted_p_values
            .iter()
            .skip(1)
            .filter(|&&q| q < 0.05)
            .count();
        assert!(significant <= 2, "{significant} flat genes called significant");
        // adjusted values never fall below raw ones
        for (p, q) in result.p_values.iter().zip(result.adjusted_p_values.iter()) {
            assert!(q >= p || (q - p).abs() < 1e-12);
        }
    }

    #[test]
    fn test_symmetry() {
        let (mat, cond_a, cond_b) = simulated_dataset(23);
        let params = compute_sseq_params(&mat, None, None);
        let ab = sseq_differential_expression(&mat, &cond_a, &cond_b, &params, None);
        let ba = sseq_differential_expression(&mat, &cond_b, &cond_a, &params, None);
        for g in 0..mat.rows() {
            assert_approx_eq!(ab.log2_fold_change[g], -ba.log2_fold_change[g], 1e-10);
            assert_approx_eq!(ab.p_values[g], ba.p_values[g], 1e-8);
        }
    }
}
