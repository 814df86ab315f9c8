use anno::{CountMatrix, Dataset};
use anyhow::{bail, Context, Error};
use hdf5::types::VarLenUnicode;
use log::info;
use ndarray::Array1;
use sprs::CsMat;
use std::path::Path;
use std::str::FromStr;

fn read_strings(group: &hdf5::Group, name: &str) -> Result<Vec<String>, Error> {
    let values = group.dataset(name)?.read_1d::<VarLenUnicode>()?;
    Ok(values.iter().map(|v| v.to_string()).collect())
}

fn to_unicode(values: &[String]) -> Result<Array1<VarLenUnicode>, Error> {
    let converted: Result<Vec<VarLenUnicode>, _> = values.iter().map(|v| VarLenUnicode::from_str(v)).collect();
    Ok(Array1::from(converted.map_err(|e| anyhow::format_err!("invalid utf-8 label: {e}"))?))
}

/// Load a 10x-style HDF5 count matrix: a `matrix` group holding CSC
/// `data`/`indices`/`indptr`/`shape` plus `barcodes` and `features/{id,name}`
/// string datasets. Returns genes x cells CSR.
pub fn load_h5(path: impl AsRef<Path>) -> Result<CountMatrix, Error> {
    let path = path.as_ref();
    let file = hdf5::File::open(path).with_context(|| path.display().to_string())?;
    let matrix = file.group("matrix")?;

    let shape = matrix.dataset("shape")?.read_1d::<i64>()?;
    if shape.len() != 2 {
        bail!("matrix/shape must have two entries, got {}", shape.len());
    }
    let (n_genes, n_cells) = (shape[0] as usize, shape[1] as usize);

    let data: Vec<u32> = matrix
        .dataset("data")?
        .read_1d::<i64>()?
        .iter()
        .map(|&v| v as u32)
        .collect();
    let indices: Vec<usize> = matrix
        .dataset("indices")?
        .read_1d::<i64>()?
        .iter()
        .map(|&v| v as usize)
        .collect();
    let indptr: Vec<usize> = matrix
        .dataset("indptr")?
        .read_1d::<i64>()?
        .iter()
        .map(|&v| v as usize)
        .collect();

    let barcodes = read_strings(&matrix, "barcodes")?;
    let features = matrix.group("features")?;
    let gene_ids = read_strings(&features, "id")?;
    let gene_names = read_strings(&features, "name")?;

    let csc: CsMat<u32> = CsMat::new_csc((n_genes, n_cells), indptr, indices, data);
    info!(
        "loaded {} x {} matrix with {} entries from {}",
        n_genes,
        n_cells,
        csc.nnz(),
        path.display()
    );
    CountMatrix::new(csc.to_csr(), barcodes, gene_ids, gene_names)
}

/// Write the annotated dataset as a single HDF5 exchange file: the count
/// matrix in the 10x layout plus an `analysis` group with cluster labels
/// and every embedding.
pub fn export_h5(ds: &Dataset, path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    let file = hdf5::File::create(path).with_context(|| path.display().to_string())?;

    let matrix = file.create_group("matrix")?;
    let csc = ds.counts.matrix.to_csc();
    let data: Vec<i64> = csc.data().iter().map(|&v| i64::from(v)).collect();
    let indices: Vec<i64> = csc.indices().iter().map(|&v| v as i64).collect();
    let mut indptr: Vec<i64> = Vec::with_capacity(csc.cols() + 1);
    let mut acc = 0i64;
    indptr.push(acc);
    for (_, column) in csc.outer_iterator().enumerate() {
        acc += column.nnz() as i64;
        indptr.push(acc);
    }
    matrix.new_dataset_builder().with_data(&data).create("data")?;
    matrix.new_dataset_builder().with_data(&indices).create("indices")?;
    matrix.new_dataset_builder().with_data(&indptr).create("indptr")?;
    matrix
        .new_dataset_builder()
        .with_data(&[ds.n_genes() as i64, ds.n_cells() as i64])
        .create("shape")?;
    matrix
        .new_dataset_builder()
        .with_data(&to_unicode(&ds.counts.barcodes)?)
        .create("barcodes")?;
    let features = matrix.create_group("features")?;
    features
        .new_dataset_builder()
        .with_data(&to_unicode(&ds.counts.gene_ids)?)
        .create("id")?;
    features
        .new_dataset_builder()
        .with_data(&to_unicode(&ds.counts.gene_names)?)
        .create("name")?;

    let analysis = file.create_group("analysis")?;
    let clusters: Vec<i64> = ds.cells.cluster.iter().map(|&c| i64::from(c)).collect();
    analysis.new_dataset_builder().with_data(&clusters).create("clusters")?;
    let phases: Vec<i64> = ds
        .cells
        .phase
        .iter()
        .map(|p| match p {
            anno::Phase::G1 => 0i64,
            anno::Phase::S => 1,
            anno::Phase::G2M => 2,
            anno::Phase::Unscored => -1,
        })
        .collect();
    analysis.new_dataset_builder().with_data(&phases).create("phase")?;

    let embeddings = analysis.create_group("embeddings")?;
    for (name, coords) in &ds.embeddings {
        embeddings.new_dataset_builder().with_data(coords).create(name.as_str())?;
    }

    info!("wrote HDF5 exchange file {}", path.display());
    Ok(())
}
