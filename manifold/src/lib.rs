//! Low-dimensional embeddings for visualization: exact t-SNE and UMAP.
//!
//! Both methods consume cells-by-components coordinates (typically PCA
//! output), are seeded, and produce 2D or 3D layouts. t-SNE here is the
//! exact O(n^2) formulation; UMAP follows the reference algorithm with a
//! fuzzy simplicial set built from exact nearest neighbors and sequential
//! SGD so results are reproducible.

#![deny(missing_docs)]

/// Fit of the UMAP output-curve parameters from min_dist/spread
pub mod curve;

/// Fuzzy simplicial set construction
pub mod fuzzy;

/// Exact t-SNE
pub mod tsne;

/// UMAP embedding
pub mod umap;

pub use tsne::Tsne;
pub use umap::Umap;
