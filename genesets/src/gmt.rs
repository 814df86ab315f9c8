use anyhow::{bail, Context, Error};
use flate2::bufread::MultiGzDecoder;
use log::info;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A named gene set from a GMT collection.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneSet {
    /// Set name (first GMT column)
    pub name: String,
    /// Free-text description (second GMT column)
    pub description: String,
    /// Member gene symbols
    pub genes: Vec<String>,
}

impl GeneSet {
    /// Resolve member symbols to row indices of `gene_names`,
    /// case-insensitively. Symbols absent from the matrix are dropped.
    pub fn to_indices(&self, gene_names: &[String]) -> Vec<usize> {
        let lookup: std::collections::HashMap<String, usize> = gene_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.to_ascii_uppercase(), i))
            .collect();
        let mut indices: Vec<usize> = self
            .genes
            .iter()
            .filter_map(|g| lookup.get(&g.to_ascii_uppercase()).copied())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Parse tab-delimited GMT records: `name <TAB> description <TAB> gene...`.
/// Empty lines are skipped; a record without genes is an error.
pub fn parse_gmt<R: BufRead>(reader: R) -> Result<Vec<GeneSet>, Error> {
    let mut sets = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = match fields.next() {
            Some(n) if !n.is_empty() => n.to_owned(),
            _ => bail!("GMT line {}: missing set name", lineno + 1),
        };
        let description = fields.next().unwrap_or_default().to_owned();
        let genes: Vec<String> = fields
            .filter(|g| !g.is_empty())
            .map(str::to_owned)
            .collect();
        if genes.is_empty() {
            bail!("GMT line {}: set '{}' has no genes", lineno + 1, name);
        }
        sets.push(GeneSet {
            name,
            description,
            genes,
        });
    }
    Ok(sets)
}

/// Load a GMT file, transparently gunzipping `.gz` paths.
pub fn load_gmt(path: impl AsRef<Path>) -> Result<Vec<GeneSet>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let sets = if path.extension().is_some_and(|e| e == "gz") {
        parse_gmt(BufReader::new(MultiGzDecoder::new(file)))?
    } else {
        parse_gmt(file)?
    };
    info!("loaded {} gene sets from {}", sets.len(), path.display());
    Ok(sets)
}
