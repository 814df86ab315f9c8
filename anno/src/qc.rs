use crate::dataset::Dataset;
use log::info;

/// Bounds used to drop low-quality cells.
///
/// A cell is kept when its library size and detected-gene count sit inside
/// the configured bounds and its mitochondrial fraction is below the cap.
#[derive(Clone, Copy, Debug)]
pub struct QcThresholds {
    /// Minimum total UMI counts
    pub min_counts: u32,
    /// Minimum number of detected genes
    pub min_genes: u32,
    /// Maximum number of detected genes (doublet guard)
    pub max_genes: u32,
    /// Maximum mitochondrial fraction, in `[0, 1]`
    pub max_mito_frac: f64,
}

impl Default for QcThresholds {
    fn default() -> Self {
        QcThresholds {
            min_counts: 500,
            min_genes: 200,
            max_genes: 6000,
            max_mito_frac: 0.15,
        }
    }
}

/// Fill per-cell and per-gene QC metrics from the raw counts.
///
/// Mitochondrial genes are recognized by a case-insensitive gene-name
/// prefix (`"MT-"` for human, `"mt-"` for mouse).
pub fn compute_qc(ds: &mut Dataset, mito_prefix: &str) {
    let n_cells = ds.n_cells();
    let n_genes = ds.n_genes();
    let prefix = mito_prefix.to_ascii_uppercase();

    let mut total = vec![0u32; n_cells];
    let mut detected = vec![0u32; n_cells];
    let mut mito = vec![0u64; n_cells];
    let mut gene_cells = vec![0u32; n_genes];
    let mut gene_total = vec![0u32; n_genes];

    for (gene, row) in ds.counts.matrix.outer_iterator().enumerate() {
        let is_mito = ds.counts.gene_names[gene].to_ascii_uppercase().starts_with(&prefix);
        for (cell, &v) in row.iter() {
            total[cell] += v;
            detected[cell] += 1;
            if is_mito {
                mito[cell] += u64::from(v);
            }
            gene_cells[gene] += 1;
            gene_total[gene] += v;
        }
    }

    ds.cells.mito_frac = mito
        .iter()
        .zip(&total)
        .map(|(&m, &t)| if t == 0 { 0.0 } else { m as f64 / f64::from(t) })
        .collect();
    ds.cells.total_counts = total;
    ds.cells.genes_detected = detected;
    ds.genes.n_cells = gene_cells;
    ds.genes.total_counts = gene_total;
}

/// Indices of cells passing the thresholds. Metrics must be computed first.
pub fn passing_cells(ds: &Dataset, thresholds: &QcThresholds) -> Vec<usize> {
    (0..ds.n_cells())
        .filter(|&c| {
            ds.cells.total_counts[c] >= thresholds.min_counts
                && ds.cells.genes_detected[c] >= thresholds.min_genes
                && ds.cells.genes_detected[c] <= thresholds.max_genes
                && ds.cells.mito_frac[c] <= thresholds.max_mito_frac
        })
        .collect()
}

impl Dataset {
    /// Drop cells failing QC, returning the filtered dataset.
    pub fn filter_cells(&self, thresholds: &QcThresholds) -> Dataset {
        let keep = passing_cells(self, thresholds);
        info!(
            "keeping {} of {} cells after QC filtering",
            keep.len(),
            self.n_cells()
        );
        self.select_cells(&keep)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dataset::CountMatrix;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use sprs::TriMat;

    fn toy() -> Dataset {
        // genes x cells; gene 1 is mitochondrial
        let dense = array![[10u32, 0, 400], [0, 2, 100], [5, 0, 500]];
        let mut tri = TriMat::new((3, 3));
        for ((r, c), &v) in dense.indexed_iter() {
            if v > 0 {
                tri.add_triplet(r, c, v);
            }
        }
        let counts = CountMatrix::new(
            tri.to_csr(),
            vec!["c0".into(), "c1".into(), "c2".into()],
            vec!["ENSG1".into(), "ENSG2".into(), "ENSG3".into()],
            vec!["ACTB".into(), "MT-ND1".into(), "GAPDH".into()],
        )
        .unwrap();
        Dataset::from_counts(counts, "toy", "hsapiens")
    }

    #[test]
    fn test_compute_qc() {
        let mut ds = toy();
        compute_qc(&mut ds, "MT-");
        assert_eq!(ds.cells.total_counts, vec![15, 2, 1000]);
        assert_eq!(ds.cells.genes_detected, vec![2, 1, 3]);
        assert_abs_diff_eq!(ds.cells.mito_frac[0], 0.0);
        assert_abs_diff_eq!(ds.cells.mito_frac[1], 1.0);
        assert_abs_diff_eq!(ds.cells.mito_frac[2], 0.1);
        assert_eq!(ds.genes.n_cells, vec![2, 2, 2]);
        assert_eq!(ds.genes.total_counts, vec![410, 102, 505]);
    }

    #[test]
    fn test_filter_cells() {
        let mut ds = toy();
        compute_qc(&mut ds, "MT-");
        let thresholds = QcThresholds {
            min_counts: 10,
            min_genes: 2,
            max_genes: 6000,
            max_mito_frac: 0.5,
        };
        // cell 1 fails min_counts and min_genes and mito cap
        assert_eq!(passing_cells(&ds, &thresholds), vec![0, 2]);
        let filtered = ds.filter_cells(&thresholds);
        assert_eq!(filtered.n_cells(), 2);
        assert_eq!(filtered.counts.barcodes, vec!["c0".to_owned(), "c2".to_owned()]);
    }
}
