use anno::CountMatrix;
use anyhow::{bail, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use log::info;
use sprs::{CsMat, TriMat};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// On-disk orientation of a count matrix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Orientation {
    /// Rows are genes, columns are cells (10x convention)
    GenesByCells,
    /// Rows are cells, columns are genes
    CellsByGenes,
}

impl FromStr for Orientation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "genes-by-cells" => Ok(Orientation::GenesByCells),
            "cells-by-genes" => Ok(Orientation::CellsByGenes),
            _ => bail!("orientation not recognized: {}", s),
        }
    }
}

fn open_maybe_gz(path: &Path) -> Result<Box<dyn BufRead>, Error> {
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

/// Load a (possibly gzipped) MatrixMarket coordinate file as a genes x
/// cells CSR matrix, transposing on the fly when the file is cells-first.
pub fn load_mtx(path: impl AsRef<Path>, orientation: Orientation) -> Result<CsMat<u32>, Error> {
    let path = path.as_ref();
    let mut reader = open_maybe_gz(path)?;

    let mut line = String::new();
    let mut mat: Option<TriMat<u32>> = None;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if line.starts_with('%') {
            continue;
        }
        let mut fields = line.split_whitespace();
        match mat {
            None => {
                let nrow = fields.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = fields.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = fields.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                let shape = match orientation {
                    Orientation::GenesByCells => (nrow, ncol),
                    Orientation::CellsByGenes => (ncol, nrow),
                };
                mat = Some(TriMat::with_capacity(shape, nnz));
            }
            Some(ref mut tri) => {
                let row = fields.next().ok_or_else(|| format_err!("missing ROW"))?.parse::<usize>()? - 1;
                let col = fields.next().ok_or_else(|| format_err!("missing COL"))?.parse::<usize>()? - 1;
                let val = fields.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<u32>()?;
                match orientation {
                    Orientation::GenesByCells => tri.add_triplet(row, col, val),
                    Orientation::CellsByGenes => tri.add_triplet(col, row, val),
                }
            }
        }
    }

    let Some(matrix) = mat else {
        bail!("no matrix found in {}", path.display())
    };
    info!(
        "loaded {} x {} matrix with {} entries from {}",
        matrix.rows(),
        matrix.cols(),
        matrix.nnz(),
        path.display()
    );
    Ok(matrix.to_csr())
}

/// One label per line, with extra tab-separated columns ignored.
fn load_label_column(path: &Path, column: usize) -> Result<Vec<String>, Error> {
    let reader = open_maybe_gz(path)?;
    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let field = line
            .split('\t')
            .nth(column)
            .ok_or_else(|| format_err!("{}: missing column {}", path.display(), column))?;
        labels.push(field.to_owned());
    }
    Ok(labels)
}

/// Load a labeled count matrix. Barcode and feature sidecar files are
/// optional; positional labels are synthesized when they are absent.
/// Feature files carry `id <TAB> name` per line, barcode files one barcode
/// per line.
pub fn load_count_matrix(
    mtx_path: impl AsRef<Path>,
    barcodes_path: Option<&Path>,
    features_path: Option<&Path>,
    orientation: Orientation,
) -> Result<CountMatrix, Error> {
    let matrix = load_mtx(mtx_path, orientation)?;

    let barcodes = match barcodes_path {
        Some(p) => load_label_column(p, 0)?,
        None => (0..matrix.cols()).map(|i| format!("cell-{i:06}")).collect(),
    };
    let (gene_ids, gene_names) = match features_path {
        Some(p) => {
            let ids = load_label_column(p, 0)?;
            // fall back to ids when the file has no name column
            let names = load_label_column(p, 1).unwrap_or_else(|_| ids.clone());
            (ids, names)
        }
        None => {
            let ids: Vec<String> = (0..matrix.rows()).map(|i| format!("gene-{i:06}")).collect();
            (ids.clone(), ids)
        }
    };

    CountMatrix::new(matrix, barcodes, gene_ids, gene_names)
}
