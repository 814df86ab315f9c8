//! Differential expression by the sSeq negative-binomial method
//!
//! Global shrunken dispersions (Yu et al. 2013) feed per-gene exact tests
//! for small counts and a beta asymptotic approximation for large ones, the
//! scheme used for one-vs-rest marker detection on UMI count matrices.

/// Negative binomial and beta test statistics
pub mod dist;

/// One-vs-rest marker ranking over a clustering
pub mod rank;

/// sSeq parameters and the pairwise differential expression test
pub mod sseq;

/// Slice statistics trait
pub mod stat;

pub use rank::{rank_markers, ClusterMarkers, MarkerRow, RankOptions};
pub use sseq::{compute_sseq_params, sseq_differential_expression, DiffExpResult, SSeqParams};
