use crate::stats::median_mut;
use anyhow::{bail, Error};
use ndarray::parallel::prelude::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use ndarray::prelude::*;
use sprs::CsMat;
use std::str::FromStr;

/// Normalization scheme for a gene-barcode UMI count matrix
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Normalization {
    /// Barcode totals are scaled to the median library size and the
    /// transformation `x -> log2(1 + x)` is applied
    LogMedian,
    /// Barcode totals are scaled to 10,000 and the transformation
    /// `x -> ln(1 + x)` is applied
    LogTarget10k,
    /// Plain `x -> log2(1 + x)`, no library-size scaling
    LogPlain,
}

impl FromStr for Normalization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logmedian" => Ok(Normalization::LogMedian),
            "logtarget10k" => Ok(Normalization::LogTarget10k),
            "logplain" => Ok(Normalization::LogPlain),
            _ => bail!("normalization not recognized: {}", s),
        }
    }
}

/// Base of logarithm used by [`log_normalize`]
#[derive(Clone, Copy)]
pub enum LogBase {
    /// ln
    E,
    /// log2
    Two,
    /// log10
    Ten,
}

impl LogBase {
    fn log1p(self, x: f64) -> f64 {
        match self {
            LogBase::E => (x + 1.0).ln(),
            LogBase::Two => (x + 1.0).log2(),
            LogBase::Ten => (x + 1.0).log10(),
        }
    }
}

/// Per-cell scale factors bringing every library to `target` total counts.
/// With `target = None` the median library size is used.
fn cell_scales(matrix: &CsMat<u32>, target: Option<f64>) -> Array1<f64> {
    let mut totals = vec![0u64; matrix.cols()];
    for (_, row) in matrix.outer_iterator().enumerate() {
        for (cell, &v) in row.iter() {
            totals[cell] += u64::from(v);
        }
    }
    let target = match target {
        Some(t) => t,
        None => {
            let mut copy = totals.clone();
            median_mut(&mut copy).map_or(1.0, |m| m.max(1.0))
        }
    };
    totals
        .iter()
        .map(|&t| if t == 0 { 0.0 } else { target / t as f64 })
        .collect()
}

/// Rebuild a CSR matrix with each stored value passed through `f(value, col)`.
fn map_stored<F>(matrix: &CsMat<u32>, f: F) -> CsMat<f64>
where
    F: Fn(u32, usize) -> f64,
{
    let mut indptr = Vec::with_capacity(matrix.rows() + 1);
    let mut indices = Vec::with_capacity(matrix.nnz());
    let mut data = Vec::with_capacity(matrix.nnz());
    indptr.push(0);
    for (_, row) in matrix.outer_iterator().enumerate() {
        for (col, &v) in row.iter() {
            indices.push(col);
            data.push(f(v, col));
        }
        indptr.push(indices.len());
    }
    CsMat::new((matrix.rows(), matrix.cols()), indptr, indices, data)
}

/// Log-normalize a count matrix:
/// 1. Scale each column (barcode) to a common total given by `target`;
///    `None` uses the median library size
/// 2. Apply `x -> log_b(1 + x)` with `b` given by `base`
///
/// Zeros stay zeros, so the result remains sparse.
pub fn log_normalize(matrix: &CsMat<u32>, target: Option<f64>, base: LogBase) -> CsMat<f64> {
    let scales = cell_scales(matrix, target);
    map_stored(matrix, |v, cell| base.log1p(f64::from(v) * scales[cell]))
}

/// Plain `x -> log2(1 + x)` with no library-size scaling.
pub fn log_transform(matrix: &CsMat<u32>) -> CsMat<f64> {
    map_stored(matrix, |v, _| LogBase::Two.log1p(f64::from(v)))
}

/// A lazily centered and variance-scaled matrix.
///
/// Represents `diag(s) * (X - mu * 1^T)` without densifying `X`: the sparse
/// part plus a rank-one offset, enough for the matrix products PCA needs.
/// `s` is `1/sd` per gene (0 for constant genes), `mu` the per-gene mean.
pub struct CenteredMatrix {
    x: CsMat<f64>,
    // transpose copy, cells x genes, for products against the left side
    xt: CsMat<f64>,
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl CenteredMatrix {
    /// Number of genes (rows)
    pub fn rows(&self) -> usize {
        self.x.rows()
    }

    /// Number of cells (columns)
    pub fn cols(&self) -> usize {
        self.x.cols()
    }

    /// `[genes, cells]`
    pub fn shape(&self) -> [usize; 2] {
        [self.x.rows(), self.x.cols()]
    }

    /// `A . b` for a dense `cells x k` matrix, yielding `genes x k`
    pub fn dot(&self, b: &ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(b.nrows(), self.cols());
        let col_sums = b.sum_axis(Axis(0));
        let mut out = Array2::<f64>::zeros((self.rows(), b.ncols()));
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(gene, mut row_out)| {
                let row = self.x.outer_view(gene).expect("row in range");
                for (cell, &v) in row.iter() {
                    row_out.scaled_add(v, &b.row(cell));
                }
                row_out.scaled_add(-self.means[gene], &col_sums);
                row_out.mapv_inplace(|x| x * self.scales[gene]);
            });
        out
    }

    /// `A^T . b` for a dense `genes x k` matrix, yielding `cells x k`
    pub fn tdot(&self, b: &ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(b.nrows(), self.rows());
        // constant offset shared by every cell
        let mut offset = Array1::<f64>::zeros(b.ncols());
        for gene in 0..self.rows() {
            offset.scaled_add(self.scales[gene] * self.means[gene], &b.row(gene));
        }
        let mut out = Array2::<f64>::zeros((self.cols(), b.ncols()));
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(cell, mut row_out)| {
                let row = self.xt.outer_view(cell).expect("cell in range");
                for (gene, &v) in row.iter() {
                    row_out.scaled_add(v * self.scales[gene], &b.row(gene));
                }
                row_out -= &offset;
            });
        out
    }

    /// Materialize the dense centered matrix. Intended for tests and small
    /// inputs.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::<f64>::zeros((self.rows(), self.cols()));
        for (mut row_out, (&mean, &scale)) in dense
            .axis_iter_mut(Axis(0))
            .zip(self.means.iter().zip(self.scales.iter()))
        {
            row_out.fill(-scale * mean);
        }
        for (gene, row) in self.x.outer_iterator().enumerate() {
            for (cell, &v) in row.iter() {
                dense[[gene, cell]] += self.scales[gene] * v;
            }
        }
        dense
    }
}

/// Center each gene to mean zero and scale to unit variance, lazily.
/// Constant genes are scaled to zero rather than dividing by zero.
pub fn scale_center(x: CsMat<f64>) -> CenteredMatrix {
    let n = x.cols() as f64;
    let mut sums = vec![0.0; x.rows()];
    let mut sq_sums = vec![0.0; x.rows()];
    for (gene, row) in x.outer_iterator().enumerate() {
        for (_, &v) in row.iter() {
            sums[gene] += v;
            sq_sums[gene] += v * v;
        }
    }
    let means = Array1::from_shape_fn(x.rows(), |g| sums[g] / n);
    let scales = Array1::from_shape_fn(x.rows(), |g| {
        let var = sq_sums[g] / n - means[g] * means[g];
        if var > 0.0 {
            1.0 / var.sqrt()
        } else {
            0.0
        }
    });
    let xt = x.transpose_view().to_csr();
    CenteredMatrix { x, xt, means, scales }
}

/// Normalize a count matrix and return the centered, scaled form PCA
/// consumes.
pub fn normalize(matrix: &CsMat<u32>, norm: Normalization) -> CenteredMatrix {
    let logged = match norm {
        Normalization::LogMedian => log_normalize(matrix, None, LogBase::Two),
        Normalization::LogTarget10k => log_normalize(matrix, Some(10_000_f64), LogBase::E),
        Normalization::LogPlain => log_transform(matrix),
    };
    scale_center(logged)
}

#[cfg(test)]
mod test_normalization {
    use super::*;
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

    fn fixture() -> CsMat<u32> {
        to_sparse(&array![
            [136, 936, 0, 0, 264],
            [134, 682, 417, 8, 391],
            [0, 133, 780, 0, 0],
            [396, 76, 96, 198, 0],
        ])
    }

    #[test]
    fn test_logmedian_normalization() {
        // # Python code to reconstruct this test
        // mat = np.array([[136, 936, 0, 0, 264],
        //     [134, 682, 417, 8, 391],
        //     [0, 133, 780, 0, 0],
        //     [396, 76, 96, 198, 0],
        //         ])
        // scale_factor = mat.sum(axis=0)
        // target_umi_count = np.median(mat.sum(axis=0))
        // half_processed_mat = mat.dot(np.diag(target_umi_count/scale_factor))
        // almost_processed_mat = np.log2(1 + half_processed_mat)
        // centering_factor = almost_processed_mat.mean(axis = 1).reshape((4,1))
        // scaling_factor = 1/np.std(almost_processed_mat, axis=1)
        // norm_mat = np.diag(scaling_factor).dot(almost_processed_mat - centering_factor)
        let expected = array![
            [0.61392149, 0.95459951, -1.21707302, -1.21707302, 0.86562504],
            [-0.11878431, 0.54279925, 0.38607315, -1.85660965, 1.04652156],
            [-0.78758751, 0.76437149, 1.59839105, -0.78758751, -0.78758751],
            [0.88718256, -0.25584717, -0.01048423, 1.09574143, -1.71659259]
        ];
        let norm = normalize(&fixture(), Normalization::LogMedian);
        assert!(expected.abs_diff_eq(&norm.to_dense(), 1e-6));
    }

    #[test]
    fn test_plain_log_normalization() {
        // # Python code to reconstruct this test
        // almost_processed_mat = np.log2(1 + mat)
        // centering_factor = almost_processed_mat.mean(axis = 1).reshape((4,1))
        // scaling_factor = 1/np.std(almost_processed_mat, axis=1)
        // norm_mat = np.diag(scaling_factor).dot(almost_processed_mat - centering_factor)
        let expected = array![
            [0.50075509, 1.16407001, -1.1965938, -1.1965938, 0.72836249],
            [-0.14245194, 0.89844192, 0.58318993, -1.88113806, 0.54195815],
            [-0.80111703, 0.89623633, 1.50711477, -0.80111703, -0.80111703],
            [0.92609909, 0.14507504, 0.25503138, 0.59722303, -1.92342854]
        ];
        let norm = normalize(&fixture(), Normalization::LogPlain);
        assert!(expected.abs_diff_eq(&norm.to_dense(), 1e-6));
    }

    #[test]
    fn test_target10k_entry_formula() {
        let mat = fixture();
        let logged = log_normalize(&mat, Some(10_000.0), LogBase::E);
        // column 0 total is 666
        let expected = (1.0 + 136.0 * 10_000.0 / 666.0).ln();
        assert!((logged.get(0, 0).copied().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_products_match_dense() {
        let norm = normalize(&fixture(), Normalization::LogMedian);
        let dense = norm.to_dense();

        let b = Array2::from_shape_fn((norm.cols(), 3), |(i, j)| (i + 2 * j) as f64 * 0.25 - 1.0);
        assert!(dense.dot(&b).abs_diff_eq(&norm.dot(&b.view()), 1e-10));

        let c = Array2::from_shape_fn((norm.rows(), 2), |(i, j)| (2 * i + j) as f64 * 0.5 - 2.0);
        assert!(dense.t().dot(&c).abs_diff_eq(&norm.tdot(&c.view()), 1e-10));
    }

    #[test]
    fn test_constant_gene_scales_to_zero() {
        let mat = to_sparse(&array![[1, 1, 1], [5, 0, 2]]);
        let norm = normalize(&mat, Normalization::LogPlain);
        let dense = norm.to_dense();
        for c in 0..3 {
            assert_eq!(dense[[0, c]], 0.0);
        }
    }

    #[test]
    fn test_no_nan_on_empty_cell() {
        // one cell with zero counts must not poison the scale factors
        let mat = to_sparse(&array![[3, 0, 7], [0, 0, 2]]);
        let norm = normalize(&mat, Normalization::LogMedian);
        let dense = norm.to_dense();
        assert!(!dense.iter().any(|v| v.is_nan()));
    }
}
