use anno::Dataset;
use anyhow::{Context, Error};
use chrono::Local;
use csv::WriterBuilder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray_npy::NpzWriter;
use serde::Serialize;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct Manifest<'a> {
    project: &'a str,
    experiment: &'a str,
    organism: &'a str,
    exported: String,
    n_cells: usize,
    n_genes: usize,
    parameters: &'a std::collections::BTreeMap<String, String>,
    embeddings: Vec<&'a str>,
    tables: Vec<&'a str>,
}

/// Write the visualization exchange bundle for one run.
///
/// Creates `out_dir/{project}_{YYYYMMDD}/` holding `manifest.json` (with
/// every analysis parameter embedded), `embeddings.npz` (compressed), a
/// gzipped per-cell annotation table, and one gzipped CSV per auxiliary
/// result table. Returns the bundle directory.
pub fn export_bundle(ds: &Dataset, out_dir: impl AsRef<Path>, project: &str) -> Result<PathBuf, Error> {
    let stamp = Local::now().format("%Y%m%d");
    let bundle = out_dir.as_ref().join(format!("{project}_{stamp}"));
    create_dir_all(&bundle).with_context(|| bundle.display().to_string())?;

    write_manifest(ds, &bundle, project)?;
    write_embeddings(ds, &bundle)?;
    write_cell_table(ds, &bundle)?;
    for (name, table) in &ds.aux.tables {
        write_table(table, &bundle.join(format!("{name}.csv.gz")))?;
    }

    info!("exported bundle to {}", bundle.display());
    Ok(bundle)
}

fn write_manifest(ds: &Dataset, bundle: &Path, project: &str) -> Result<(), Error> {
    let manifest = Manifest {
        project,
        experiment: &ds.aux.experiment,
        organism: &ds.aux.organism,
        exported: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        n_cells: ds.n_cells(),
        n_genes: ds.n_genes(),
        parameters: &ds.aux.parameters,
        embeddings: ds.embeddings.keys().map(String::as_str).collect(),
        tables: ds.aux.tables.keys().map(String::as_str).collect(),
    };
    let path = bundle.join("manifest.json");
    let file = File::create(&path).with_context(|| path.display().to_string())?;
    serde_json::to_writer_pretty(file, &manifest)?;
    Ok(())
}

fn write_embeddings(ds: &Dataset, bundle: &Path) -> Result<(), Error> {
    if ds.embeddings.is_empty() {
        return Ok(());
    }
    let path = bundle.join("embeddings.npz");
    let mut npz = NpzWriter::new_compressed(File::create(&path).with_context(|| path.display().to_string())?);
    for (name, coords) in &ds.embeddings {
        npz.add_array(name.as_str(), coords)?;
    }
    npz.finish()?;
    Ok(())
}

fn gz_csv_writer(path: &Path) -> Result<csv::Writer<GzEncoder<File>>, Error> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    Ok(WriterBuilder::new().from_writer(GzEncoder::new(file, Compression::default())))
}

fn write_cell_table(ds: &Dataset, bundle: &Path) -> Result<(), Error> {
    let mut writer = gz_csv_writer(&bundle.join("cells.csv.gz"))?;
    writer.write_record([
        "barcode",
        "sample",
        "total_counts",
        "genes_detected",
        "mito_frac",
        "cluster",
        "phase",
    ])?;
    for c in 0..ds.n_cells() {
        writer.write_record([
            ds.counts.barcodes[c].as_str(),
            ds.cells.sample[c].as_str(),
            &ds.cells.total_counts[c].to_string(),
            &ds.cells.genes_detected[c].to_string(),
            &format!("{:.6}", ds.cells.mito_frac[c]),
            &ds.cells.cluster[c].to_string(),
            &ds.cells.phase[c].to_string(),
        ])?;
    }
    writer.flush()?;
    writer.into_inner()?.finish()?.flush()?;
    Ok(())
}

fn write_table(table: &anno::DataTable, path: &Path) -> Result<(), Error> {
    let mut writer = gz_csv_writer(path)?;
    writer.write_record(table.names())?;
    for row in 0..table.n_rows() {
        let record: Vec<String> = table.columns().map(|(_, col)| col.format(row)).collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    writer.into_inner()?.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use anno::{Column, CountMatrix, DataTable};
    use ndarray::array;
    use sprs::TriMat;
    use std::io::Read;

    fn toy_dataset() -> Dataset {
        let mut tri = TriMat::new((2, 3));
        tri.add_triplet(0, 0, 4u32);
        tri.add_triplet(1, 2, 2);
        let counts = CountMatrix::new(
            tri.to_csr(),
            vec!["AAAC".into(), "AAAG".into(), "AAAT".into()],
            vec!["ENSG1".into(), "ENSG2".into()],
            vec!["ACTB".into(), "CD3E".into()],
        )
        .unwrap();
        let mut ds = Dataset::from_counts(counts, "toy experiment", "hsapiens");
        ds.aux.parameters.insert("n_pcs".into(), "25".into());
        ds.set_embedding("umap", array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]])
            .unwrap();
        let mut table = DataTable::new();
        table.push("gene", Column::Str(vec!["ACTB".into()])).unwrap();
        table.push("log2_fc", Column::F64(vec![2.0])).unwrap();
        ds.aux.tables.insert("markers".into(), table);
        ds
    }

    fn read_gz(path: &Path) -> String {
        let mut out = String::new();
        flate2::read::MultiGzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_export_bundle() {
        let ds = toy_dataset();
        let out = std::env::temp_dir().join(format!("mat-io-export-{}", std::process::id()));
        let bundle = export_bundle(&ds, &out, "toyproj").unwrap();

        // directory name embeds project and date
        let dirname = bundle.file_name().unwrap().to_string_lossy().to_string();
        assert!(dirname.starts_with("toyproj_20"));
        assert_eq!(dirname.len(), "toyproj_".len() + 8);

        let manifest = std::fs::read_to_string(bundle.join("manifest.json")).unwrap();
        assert!(manifest.contains("\"project\": \"toyproj\""));
        assert!(manifest.contains("\"n_pcs\": \"25\""));
        assert!(manifest.contains("\"n_cells\": 3"));

        let cells = read_gz(&bundle.join("cells.csv.gz"));
        assert!(cells.starts_with("barcode,sample,total_counts"));
        assert!(cells.contains("AAAC"));

        let markers = read_gz(&bundle.join("markers.csv.gz"));
        assert_eq!(markers.lines().next().unwrap(), "gene,log2_fc");
        assert!(markers.contains("ACTB,2"));

        assert!(bundle.join("embeddings.npz").exists());

        std::fs::remove_dir_all(&out).ok();
    }
}
