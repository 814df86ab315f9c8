//! Gene sets: GMT collections, per-cell signature scores, cell-cycle phase
//! calls, and over-representation analysis of marker genes.

/// Cell-cycle scoring from the canonical S and G2/M gene lists
pub mod cellcycle;

/// GMT gene-set files
pub mod gmt;

/// Hypergeometric over-representation analysis
pub mod ora;

/// Per-cell module scores
pub mod score;

pub use gmt::{load_gmt, GeneSet};
pub use ora::{ora, OraOptions, OraResult};
pub use score::module_score;
