use crate::stats::{mean_var, median_mut};
use log::info;
use noisy_float::prelude::n64;
use sprs::CsMat;

/// Settings for dispersion-based variable gene selection.
pub struct VariableGenes {
    /// Number of genes to keep
    pub n_genes: usize,
    /// Number of mean-expression bins used to normalize dispersions
    pub n_bins: usize,
}

impl Default for VariableGenes {
    fn default() -> Self {
        VariableGenes {
            n_genes: 2000,
            n_bins: 20,
        }
    }
}

impl VariableGenes {
    /// Pick highly variable genes from raw counts.
    ///
    /// Counts are scaled per cell to the median library size; each gene gets
    /// a dispersion (variance over mean), which is z-scored against genes of
    /// similar mean expression (equal-count bins). The top `n_genes` by
    /// normalized dispersion are returned as sorted row indices.
    pub fn select(&self, counts: &CsMat<u32>) -> Vec<usize> {
        let n_genes = counts.rows();
        let n_cells = counts.cols() as f64;

        let mut totals = vec![0f64; counts.cols()];
        for (_, row) in counts.outer_iterator().enumerate() {
            for (cell, &v) in row.iter() {
                totals[cell] += f64::from(v);
            }
        }
        let target = {
            let mut copy = totals.clone();
            median_mut(&mut copy).map_or(1.0, |m| m.max(1.0))
        };
        let scales: Vec<f64> = totals
            .iter()
            .map(|&t| if t == 0.0 { 0.0 } else { target / t })
            .collect();

        // mean and dispersion of size-normalized counts per gene
        let mut stats = Vec::with_capacity(n_genes);
        for (gene, row) in counts.outer_iterator().enumerate() {
            let mut sum = 0.0;
            let mut sq_sum = 0.0;
            for (cell, &v) in row.iter() {
                let x = f64::from(v) * scales[cell];
                sum += x;
                sq_sum += x * x;
            }
            let mean = sum / n_cells;
            let var = sq_sum / n_cells - mean * mean;
            let dispersion = if mean > 0.0 { var / mean } else { 0.0 };
            stats.push((gene, mean, dispersion));
        }

        // equal-count bins by mean expression
        let mut order: Vec<usize> = (0..n_genes).collect();
        order.sort_unstable_by_key(|&g| (n64(stats[g].1), g));
        let bin_size = (n_genes + self.n_bins - 1) / self.n_bins.max(1);

        let mut z = vec![f64::NEG_INFINITY; n_genes];
        for chunk in order.chunks(bin_size.max(1)) {
            let disps: Vec<f64> = chunk.iter().map(|&g| stats[g].2).collect();
            let (bin_mean, bin_var) = mean_var(&disps);
            let bin_sd = bin_var.sqrt();
            for &g in chunk {
                if stats[g].1 > 0.0 {
                    z[g] = if bin_sd > 0.0 {
                        (stats[g].2 - bin_mean) / bin_sd
                    } else {
                        0.0
                    };
                }
            }
        }

        let mut ranked: Vec<usize> = (0..n_genes).filter(|&g| z[g].is_finite()).collect();
        ranked.sort_unstable_by_key(|&g| (-n64(z[g]), g));
        ranked.truncate(self.n_genes);
        ranked.sort_unstable();
        info!(
            "selected {} of {} genes as highly variable",
            ranked.len(),
            n_genes
        );
        ranked
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array2;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;
    use sprs::TriMat;

    fn to_sparse(dense: &Array2<u32>) -> CsMat<u32> {
        let mut tri = TriMat::new((dense.nrows(), dense.ncols()));
        for ((r, c), &v) in dense.indexed_iter() {
            if v > 0 {
                tri.add_triplet(r, c, v);
            }
        }
        tri.to_csr()
    }

    #[test]
    fn test_bimodal_gene_wins() {
        // 20 flat genes plus one gene expressed in half the cells only
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let cells = 60;
        let mut dense = Array2::<u32>::zeros((21, cells));
        for g in 0..20 {
            for c in 0..cells {
                dense[[g, c]] = 9 + rng.gen_range(0..3);
            }
        }
        for c in 0..cells / 2 {
            dense[[20, c]] = 20;
        }

        let picked = VariableGenes {
            n_genes: 3,
            n_bins: 4,
        }
        .select(&to_sparse(&dense));
        assert_eq!(picked.len(), 3);
        assert!(picked.contains(&20), "bimodal gene not selected: {picked:?}");
    }

    #[test]
    fn test_request_more_than_available() {
        let dense = ndarray::array![[3u32, 1, 0], [0, 2, 2]];
        let picked = VariableGenes {
            n_genes: 100,
            n_bins: 2,
        }
        .select(&to_sparse(&dense));
        assert_eq!(picked, vec![0, 1]);
    }
}
