use anno::Dataset;
use anyhow::{Context, Error};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Persist the full dataset as a gzipped bincode snapshot for later
/// reloading.
pub fn write_snapshot(ds: &Dataset, path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
    bincode::serialize_into(writer, ds)?;
    info!(
        "snapshot of {} cells x {} genes written to {}",
        ds.n_cells(),
        ds.n_genes(),
        path.display()
    );
    Ok(())
}

/// Reload a dataset snapshot written by [`write_snapshot`].
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<Dataset, Error> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| path.display().to_string())?;
    let reader = BufReader::new(MultiGzDecoder::new(file));
    let ds = bincode::deserialize_from(reader)?;
    Ok(ds)
}
