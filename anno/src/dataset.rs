use crate::table::DataTable;
use anyhow::{bail, Error};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sparse UMI counts with row (gene) and column (cell) labels.
///
/// Rows are genes, columns are cell barcodes, storage is CSR so per-gene
/// iteration is cheap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CountMatrix {
    /// Cell barcode per column
    pub barcodes: Vec<String>,
    /// Stable gene identifier per row (e.g. Ensembl id)
    pub gene_ids: Vec<String>,
    /// Display name per row (gene symbol)
    pub gene_names: Vec<String>,
    /// genes x cells counts
    pub matrix: CsMat<u32>,
}

impl CountMatrix {
    /// Construct, validating label lengths against the matrix shape.
    pub fn new(
        matrix: CsMat<u32>,
        barcodes: Vec<String>,
        gene_ids: Vec<String>,
        gene_names: Vec<String>,
    ) -> Result<CountMatrix, Error> {
        if barcodes.len() != matrix.cols() {
            bail!(
                "barcode count {} does not match matrix columns {}",
                barcodes.len(),
                matrix.cols()
            );
        }
        if gene_ids.len() != matrix.rows() || gene_names.len() != matrix.rows() {
            bail!(
                "gene label counts {}/{} do not match matrix rows {}",
                gene_ids.len(),
                gene_names.len(),
                matrix.rows()
            );
        }
        Ok(CountMatrix {
            barcodes,
            gene_ids,
            gene_names,
            matrix,
        })
    }

    /// Number of genes (rows)
    pub fn genes(&self) -> usize {
        self.matrix.rows()
    }

    /// Number of cells (columns)
    pub fn cells(&self) -> usize {
        self.matrix.cols()
    }

    /// Restrict to a subset of cells, preserving their relative order.
    pub fn select_cells(&self, keep: &[usize]) -> CountMatrix {
        CountMatrix {
            barcodes: keep.iter().map(|&c| self.barcodes[c].clone()).collect(),
            gene_ids: self.gene_ids.clone(),
            gene_names: self.gene_names.clone(),
            matrix: select_cols(&self.matrix, keep),
        }
    }
}

/// Keep only the listed columns of a CSR matrix, in the listed order.
pub fn select_cols(matrix: &CsMat<u32>, keep: &[usize]) -> CsMat<u32> {
    let mut col_map = vec![usize::MAX; matrix.cols()];
    for (new, &old) in keep.iter().enumerate() {
        col_map[old] = new;
    }
    let mut tri = TriMat::with_capacity((matrix.rows(), keep.len()), matrix.nnz());
    for (row, vec) in matrix.outer_iterator().enumerate() {
        for (col, &v) in vec.iter() {
            let new_col = col_map[col];
            if new_col != usize::MAX {
                tri.add_triplet(row, new_col, v);
            }
        }
    }
    tri.to_csr()
}

/// Cell-cycle phase call
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Phase {
    /// Interphase growth, neither S nor G2/M signature dominates
    G1,
    /// DNA synthesis
    S,
    /// G2 and mitosis
    G2M,
    /// Phase not scored yet
    Unscored,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::G1 => "G1",
            Phase::S => "S",
            Phase::G2M => "G2M",
            Phase::Unscored => "unscored",
        };
        f.write_str(s)
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "G1" => Ok(Phase::G1),
            "S" => Ok(Phase::S),
            "G2M" => Ok(Phase::G2M),
            "unscored" => Ok(Phase::Unscored),
            _ => bail!("phase not recognized: {}", s),
        }
    }
}

/// Columnar per-cell metadata, one entry per column of the count matrix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellTable {
    /// Library size: total UMI counts per cell
    pub total_counts: Vec<u32>,
    /// Number of genes with nonzero counts per cell
    pub genes_detected: Vec<u32>,
    /// Fraction of counts from mitochondrial genes, in `[0, 1]`
    pub mito_frac: Vec<f64>,
    /// Sample of origin label
    pub sample: Vec<String>,
    /// Cluster assignment; -1 means unassigned
    pub cluster: Vec<i16>,
    /// Cell-cycle phase call
    pub phase: Vec<Phase>,
}

impl CellTable {
    fn sized(n: usize) -> CellTable {
        CellTable {
            total_counts: vec![0; n],
            genes_detected: vec![0; n],
            mito_frac: vec![0.0; n],
            sample: vec![String::new(); n],
            cluster: vec![-1; n],
            phase: vec![Phase::Unscored; n],
        }
    }

    fn select(&self, keep: &[usize]) -> CellTable {
        CellTable {
            total_counts: keep.iter().map(|&i| self.total_counts[i]).collect(),
            genes_detected: keep.iter().map(|&i| self.genes_detected[i]).collect(),
            mito_frac: keep.iter().map(|&i| self.mito_frac[i]).collect(),
            sample: keep.iter().map(|&i| self.sample[i].clone()).collect(),
            cluster: keep.iter().map(|&i| self.cluster[i]).collect(),
            phase: keep.iter().map(|&i| self.phase[i]).collect(),
        }
    }
}

/// Columnar per-gene metadata, one entry per row of the count matrix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneTable {
    /// Number of cells in which the gene was detected
    pub n_cells: Vec<u32>,
    /// Total UMI counts across all cells
    pub total_counts: Vec<u32>,
}

impl GeneTable {
    fn sized(n: usize) -> GeneTable {
        GeneTable {
            n_cells: vec![0; n],
            total_counts: vec![0; n],
        }
    }
}

/// Free-form auxiliary store: experiment annotations, parameters, gene
/// lists, and computed result tables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Aux {
    /// Human-readable experiment description
    pub experiment: String,
    /// Organism code (e.g. "hsapiens")
    pub organism: String,
    /// Analysis parameters as written into exported artifacts
    pub parameters: BTreeMap<String, String>,
    /// Named gene lists (signatures, cell-cycle genes, ...)
    pub gene_lists: BTreeMap<String, Vec<String>>,
    /// Named result tables (markers, enrichment, trajectory, ...)
    pub tables: BTreeMap<String, DataTable>,
}

/// The annotated dataset: counts plus everything computed from them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dataset {
    /// Sparse gene x cell counts with labels
    pub counts: CountMatrix,
    /// Per-cell metadata
    pub cells: CellTable,
    /// Per-gene metadata
    pub genes: GeneTable,
    /// Named embeddings, each cells x dims
    pub embeddings: BTreeMap<String, Array2<f64>>,
    /// Auxiliary annotations and results
    pub aux: Aux,
}

impl Dataset {
    /// Wrap a freshly loaded count matrix with empty metadata.
    pub fn from_counts(counts: CountMatrix, experiment: &str, organism: &str) -> Dataset {
        let n_cells = counts.cells();
        let n_genes = counts.genes();
        Dataset {
            counts,
            cells: CellTable::sized(n_cells),
            genes: GeneTable::sized(n_genes),
            embeddings: BTreeMap::new(),
            aux: Aux {
                experiment: experiment.to_owned(),
                organism: organism.to_owned(),
                ..Aux::default()
            },
        }
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.counts.cells()
    }

    /// Number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.genes()
    }

    /// Store an embedding, replacing any previous one under `name`.
    ///
    /// Fails if the row count does not match the number of cells.
    pub fn set_embedding(&mut self, name: &str, coords: Array2<f64>) -> Result<(), Error> {
        if coords.nrows() != self.n_cells() {
            bail!(
                "embedding '{}' has {} rows for {} cells",
                name,
                coords.nrows(),
                self.n_cells()
            );
        }
        self.embeddings.insert(name.to_owned(), coords);
        Ok(())
    }

    /// Subset to the given cells, carrying metadata and embeddings along.
    /// Gene annotations and the auxiliary store are kept as-is.
    pub fn select_cells(&self, keep: &[usize]) -> Dataset {
        let embeddings = self
            .embeddings
            .iter()
            .map(|(name, coords)| {
                let mut sub = Array2::zeros((keep.len(), coords.ncols()));
                for (new, &old) in keep.iter().enumerate() {
                    sub.row_mut(new).assign(&coords.row(old));
                }
                (name.clone(), sub)
            })
            .collect();
        Dataset {
            counts: self.counts.select_cells(keep),
            cells: self.cells.select(keep),
            genes: self.genes.clone(),
            embeddings,
            aux: self.aux.clone(),
        }
    }

    /// Indices of cells whose phase equals `phase`.
    pub fn cells_in_phase(&self, phase: Phase) -> Vec<usize> {
        self.cells
            .phase
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == phase)
            .map(|(i, _)| i)
            .collect()
    }
}
