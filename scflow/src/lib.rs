//! # scflow: single-cell matrix preprocessing and reduction
//!
//! Count-matrix normalization, randomized PCA over sparse-plus-rank-one
//! inputs, and exact nearest-neighbor search. These are the numeric stages
//! between a loaded count matrix and the graph/embedding steps downstream.

#![deny(missing_docs)]

/// Dimensionality reduction methods
pub mod dim_red;

/// Nearest-neighbor search over embedding coordinates
pub mod nn;

/// Count matrix normalization methods
pub mod normalization;

/// Statistics helpers
pub mod stats;

/// Highly variable gene selection
pub mod variable;
