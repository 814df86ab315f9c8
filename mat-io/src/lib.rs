//! # mat-io: dataset input and artifact output
//!
//! Loads count matrices from gzipped MatrixMarket triplets (and, behind the
//! `hdf5` feature, 10x-style HDF5 files), writes the per-run visualization
//! exchange bundle, and persists full dataset snapshots for later
//! reloading.

#![deny(missing_docs)]

/// Exchange bundle export
pub mod export;

/// MatrixMarket count matrix loading
pub mod mtx;

/// Whole-dataset snapshots
pub mod snapshot;

/// HDF5 count matrix loading and single-file export
#[cfg(feature = "hdf5")]
pub mod h5;

pub use export::export_bundle;
pub use mtx::{load_count_matrix, load_mtx, Orientation};
pub use snapshot::{read_snapshot, write_snapshot};
