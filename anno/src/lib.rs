//! # anno: the annotated single-cell dataset
//!
//! One in-memory container bundles everything the pipeline computes: the
//! sparse gene-by-cell count matrix, per-cell and per-gene metadata, named
//! low-dimensional embeddings, and a free-form auxiliary store for result
//! tables. Every stage mutates the same [`Dataset`] in place; the whole
//! container serializes for snapshots.

#![deny(missing_docs)]

/// The dataset container and its subsetting operations
pub mod dataset;

/// Per-cell and per-gene quality control metrics and filtering
pub mod qc;

/// Generic named-column tables for auxiliary results
pub mod table;

pub use dataset::{CountMatrix, Dataset, Phase};
pub use qc::QcThresholds;
pub use table::{Column, DataTable};
