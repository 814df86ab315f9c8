use super::bk_svd::BkSvd;
use super::{pca_cell_coords, Pca, SpectralInput};
use crate::normalization::{normalize, Normalization};
use ndarray::prelude::*;
use ndarray_linalg::QR;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_distr::Normal;
use rand_pcg::Pcg64Mcg;
use sprs::TriMat;

/// A matrix with a prescribed, well-separated spectrum so the randomized
/// method has something unambiguous to recover.
fn engineered_matrix(m: usize, n: usize, spectrum: &[f64], seed: u64) -> Array2<f64> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let dist = Normal::new(0.0f64, 1.0f64).unwrap();
    let u = Array2::<f64>::random_using((m, spectrum.len()), dist, &mut rng)
        .qr()
        .unwrap()
        .0;
    let v = Array2::<f64>::random_using((n, spectrum.len()), dist, &mut rng)
        .qr()
        .unwrap()
        .0;
    let mut scaled = u;
    for (mut col, &s) in scaled.columns_mut().into_iter().zip(spectrum.iter()) {
        col.mapv_inplace(|x| x * s);
    }
    scaled.dot(&v.t())
}

#[test]
fn test_recovers_spectrum() {
    let spectrum = [40.0, 20.0, 10.0, 5.0, 2.5];
    for &(m, n) in &[(60usize, 45usize), (45, 60)] {
        let a = engineered_matrix(m, n, &spectrum, 7);
        let (u, d, v) = BkSvd::new().run_pca(&a, 5).unwrap();

        assert!(d.abs_diff_eq(&arr1(&spectrum), 1e-6));

        // U D V^T reconstructs the matrix
        let reconstructed = u.dot(&Array2::from_diag(&d)).dot(&v.t());
        assert!(a.abs_diff_eq(&reconstructed, 1e-6));

        // singular vectors are orthonormal
        assert!(u.t().dot(&u).abs_diff_eq(&Array2::eye(5), 1e-8));
        assert!(v.t().dot(&v).abs_diff_eq(&Array2::eye(5), 1e-8));
    }
}

#[test]
fn test_centered_sparse_matches_dense() {
    let mut rng = Pcg64Mcg::seed_from_u64(11);
    let dist = rand::distributions::Uniform::new(0u32, 12u32);
    let dense_counts = Array2::<u32>::random_using((30, 25), dist, &mut rng);
    let mut tri = TriMat::new((30, 25));
    for ((r, c), &v) in dense_counts.indexed_iter() {
        if v > 0 {
            tri.add_triplet(r, c, v);
        }
    }
    let norm = normalize(&tri.to_csr(), Normalization::LogMedian);

    let (_, d_sparse, v_sparse) = BkSvd::new().run_pca(&norm, 4).unwrap();
    let dense = norm.to_dense();
    let (_, d_dense, v_dense) = BkSvd::new().run_pca(&dense, 4).unwrap();

    assert!(d_sparse.abs_diff_eq(&d_dense, 1e-6));
    // columns agree up to sign
    for j in 0..4 {
        let a = v_sparse.column(j);
        let b = v_dense.column(j);
        let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        assert!((dot.abs() - 1.0).abs() < 1e-6, "column {j} misaligned: {dot}");
    }
}

#[test]
fn test_cell_coords_scale_by_singular_values() {
    let a = engineered_matrix(20, 15, &[8.0, 4.0], 3);
    let (_, d, v) = BkSvd::new().run_pca(&a, 2).unwrap();
    let coords = pca_cell_coords(&d, &v);
    assert_eq!(coords.shape(), &[15, 2]);
    for j in 0..2 {
        let norm: f64 = coords.column(j).iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - d[j]).abs() < 1e-6);
    }
}

#[test]
fn test_invalid_inputs() {
    let a = engineered_matrix(10, 8, &[3.0, 1.0], 1);
    assert!(BkSvd::new().run_pca(&a, 0).is_err());
    assert!(BkSvd::new().run_pca(&a, 9).is_err());
    let tiny: Array2<f64> = Array2::zeros((1, 5));
    assert!(BkSvd::new().run_pca(&tiny, 1).is_err());
}

#[test]
fn test_shape_trait() {
    let a: Array2<f64> = Array2::zeros((4, 6));
    assert_eq!(SpectralInput::shape(&a), [4, 6]);
}
