//! Dimensionality reduction.
//!
//! PCA here is a plain SVD of whatever matrix it is handed; centering and
//! scaling are the caller's job (see [`crate::normalization`]). The methods
//! only ever touch the input through matrix-times-dense products, so they
//! are written against the [`SpectralInput`] trait rather than a concrete
//! matrix type: dense arrays and the sparse-plus-rank-one
//! [`CenteredMatrix`](crate::normalization::CenteredMatrix) both qualify
//! without the algorithm knowing the difference.

use crate::normalization::CenteredMatrix;
use anyhow::Error;
use ndarray::{Array1, Array2, ArrayView2};
use pulse::{Monitor, Silent};

/// Randomized block Krylov SVD
pub mod bk_svd;

#[cfg(test)]
pub(crate) mod test;

/// `(u, d, v)`: left singular vectors (genes x k), singular values, right
/// singular vectors (cells x k)
pub type PcaResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// The two products a randomized SVD needs, plus the shape.
pub trait SpectralInput {
    /// `[rows, cols]` of the matrix
    fn shape(&self) -> [usize; 2];

    /// `A . b` for dense `b` with `cols` rows
    fn dot(&self, b: &ArrayView2<f64>) -> Array2<f64>;

    /// `A^T . b` for dense `b` with `rows` rows
    fn tdot(&self, b: &ArrayView2<f64>) -> Array2<f64>;
}

impl SpectralInput for Array2<f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }

    fn dot(&self, b: &ArrayView2<f64>) -> Array2<f64> {
        self.dot(b)
    }

    fn tdot(&self, b: &ArrayView2<f64>) -> Array2<f64> {
        self.t().dot(b)
    }
}

impl SpectralInput for CenteredMatrix {
    fn shape(&self) -> [usize; 2] {
        CenteredMatrix::shape(self)
    }

    fn dot(&self, b: &ArrayView2<f64>) -> Array2<f64> {
        CenteredMatrix::dot(self, b)
    }

    fn tdot(&self, b: &ArrayView2<f64>) -> Array2<f64> {
        CenteredMatrix::tdot(self, b)
    }
}

/// Perform an SVD of a matrix, retaining `k` components.
pub trait Pca {
    /// Compute a rank `k` decomposition, reporting progress to `monitor`.
    fn run_pca_monitored(
        &self,
        matrix: &impl SpectralInput,
        k: usize,
        monitor: impl Monitor,
    ) -> Result<PcaResult, Error>;

    /// Compute a rank `k` decomposition without progress tracking.
    fn run_pca(&self, matrix: &impl SpectralInput, k: usize) -> Result<PcaResult, Error> {
        self.run_pca_monitored(matrix, k, Silent)
    }
}

/// Cell coordinates in PC space: right singular vectors scaled by the
/// singular values, cells x k.
pub fn pca_cell_coords(d: &Array1<f64>, v: &Array2<f64>) -> Array2<f64> {
    let mut coords = v.clone();
    for (mut col, &s) in coords.columns_mut().into_iter().zip(d.iter()) {
        col.mapv_inplace(|x| x * s);
    }
    coords
}
