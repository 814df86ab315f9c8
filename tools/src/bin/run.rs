// scflow-run: the end-to-end secondary analysis pipeline.
//
// One strictly sequential pass over a single annotated dataset:
// load -> QC -> filter -> normalize -> variable genes -> PCA -> cluster ->
// cluster tree -> cell cycle -> t-SNE -> UMAP -> markers -> enrichment ->
// trajectory (all cells, then G1 subset) -> export bundle -> snapshot.

use anno::{Column, DataTable, Dataset, Phase, QcThresholds};
use anyhow::{format_err, Context, Error};
use chrono::Local;
use clap::{value_parser, Arg, Command};
use ctree::{cluster_centroids, ClusterTree, LinkageMethod};
use genesets::cellcycle::{self, PhaseCall};
use genesets::{load_gmt, module_score, ora, GeneSet, OraOptions};
use log::info;
use louvain::{shared_nearest_neighbors, Louvain};
use manifold::{Tsne, Umap};
use markers::{rank_markers, ClusterMarkers, RankOptions};
use scflow::dim_red::bk_svd::BkSvd;
use scflow::dim_red::{pca_cell_coords, Pca};
use scflow::normalization::{log_normalize, log_transform, scale_center, LogBase, Normalization};
use scflow::variable::VariableGenes;
use serde::Deserialize;
use sprs::CsMat;
use std::fs::read_to_string;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct QcConfig {
    min_counts: u32,
    min_genes: u32,
    max_genes: u32,
    max_mito_frac: f64,
}

impl Default for QcConfig {
    fn default() -> Self {
        QcConfig {
            min_counts: 500,
            min_genes: 200,
            max_genes: 6000,
            max_mito_frac: 0.15,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct TsneConfig {
    perplexity: f64,
    n_iter: usize,
}

impl Default for TsneConfig {
    fn default() -> Self {
        TsneConfig {
            perplexity: 30.0,
            n_iter: 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct UmapConfig {
    n_neighbors: usize,
    min_dist: f64,
    spread: f64,
}

impl Default for UmapConfig {
    fn default() -> Self {
        UmapConfig {
            n_neighbors: 30,
            min_dist: 0.3,
            spread: 1.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct MarkerConfig {
    top_n: usize,
    max_adjusted_p: f64,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        MarkerConfig {
            top_n: 50,
            max_adjusted_p: 0.05,
        }
    }
}

/// Run configuration; every field has a literal default, a TOML file and
/// CLI flags override them.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Config {
    project: String,
    experiment: String,
    organism: String,
    sample: String,
    matrix: PathBuf,
    barcodes: Option<PathBuf>,
    features: Option<PathBuf>,
    gene_sets: Option<PathBuf>,
    orientation: String,
    out_dir: PathBuf,
    mito_prefix: String,
    qc: QcConfig,
    normalization: String,
    n_variable_genes: usize,
    n_pcs: usize,
    n_neighbors: usize,
    snn_prune: f64,
    resolution: f64,
    tsne: TsneConfig,
    umap: UmapConfig,
    markers: MarkerConfig,
    enrichment_threads: usize,
    root_cluster: Option<i16>,
    seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project: "scproject".into(),
            experiment: "single-cell secondary analysis".into(),
            organism: "hsapiens".into(),
            sample: "sample1".into(),
            matrix: PathBuf::from("data/matrix.mtx.gz"),
            barcodes: None,
            features: None,
            gene_sets: None,
            orientation: "genes-by-cells".into(),
            out_dir: PathBuf::from("out"),
            mito_prefix: "MT-".into(),
            qc: QcConfig::default(),
            normalization: "logmedian".into(),
            n_variable_genes: 2000,
            n_pcs: 25,
            n_neighbors: 20,
            snn_prune: 1.0 / 15.0,
            resolution: 1.0,
            tsne: TsneConfig::default(),
            umap: UmapConfig::default(),
            markers: MarkerConfig::default(),
            enrichment_threads: 1,
            root_cluster: None,
            seed: 0,
        }
    }
}

fn init_log() {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

fn main() -> Result<(), Error> {
    init_log();

    let matches = Command::new("scflow-run")
        .about("Single-cell secondary analysis pipeline")
        .arg(
            Arg::new("CONFIG")
                .help("TOML run configuration")
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("MATRIX")
                .help("Count matrix to analyze (overrides the config)")
                .short('m')
                .long("matrix")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory (overrides the config)")
                .short('o')
                .long("out_dir")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("GENE_SETS")
                .help("GMT gene-set collection (overrides the config)")
                .short('g')
                .long("gene_sets")
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let mut config: Config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => {
            let text = read_to_string(path).with_context(|| path.display().to_string())?;
            toml::from_str(&text).with_context(|| path.display().to_string())?
        }
        None => Config::default(),
    };
    if let Some(matrix) = matches.get_one::<PathBuf>("MATRIX") {
        config.matrix = matrix.clone();
    }
    if let Some(out_dir) = matches.get_one::<PathBuf>("OUT_DIR") {
        config.out_dir = out_dir.clone();
    }
    if let Some(gene_sets) = matches.get_one::<PathBuf>("GENE_SETS") {
        config.gene_sets = Some(gene_sets.clone());
    }

    run(&config)
}

fn timed<T>(stage: &str, f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    let start = Instant::now();
    let value = f()?;
    info!("{} finished in {:.2}s", stage, start.elapsed().as_secs_f64());
    Ok(value)
}

fn run(config: &Config) -> Result<(), Error> {
    let orientation = config.orientation.parse()?;

    let mut ds = timed("load", || {
        let counts = mat_io::load_count_matrix(
            &config.matrix,
            config.barcodes.as_deref(),
            config.features.as_deref(),
            orientation,
        )?;
        let mut ds = Dataset::from_counts(counts, &config.experiment, &config.organism);
        ds.cells.sample = vec![config.sample.clone(); ds.n_cells()];
        Ok(ds)
    })?;

    let mut ds = timed("qc", || {
        anno::qc::compute_qc(&mut ds, &config.mito_prefix);
        let thresholds = QcThresholds {
            min_counts: config.qc.min_counts,
            min_genes: config.qc.min_genes,
            max_genes: config.qc.max_genes,
            max_mito_frac: config.qc.max_mito_frac,
        };
        let mut filtered = ds.filter_cells(&thresholds);
        // refresh per-gene metrics against the surviving cells
        anno::qc::compute_qc(&mut filtered, &config.mito_prefix);
        Ok(filtered)
    })?;
    record_parameters(&mut ds, config);

    let normalization: Normalization = config.normalization.parse()?;
    let logged = timed("normalize", || {
        Ok(match normalization {
            Normalization::LogMedian => log_normalize(&ds.counts.matrix, None, LogBase::Two),
            Normalization::LogTarget10k => log_normalize(&ds.counts.matrix, Some(10_000.0), LogBase::E),
            Normalization::LogPlain => log_transform(&ds.counts.matrix),
        })
    })?;

    let pca = timed("pca", || {
        let hvg = VariableGenes {
            n_genes: config.n_variable_genes,
            n_bins: 20,
        }
        .select(&ds.counts.matrix);
        let centered = scale_center(select_rows(&logged, &hvg));
        let k = config.n_pcs.min(hvg.len().saturating_sub(1)).min(ds.n_cells().saturating_sub(1));
        let (_, d, v) = BkSvd {
            seed: config.seed,
            ..BkSvd::new()
        }
        .run_pca(&centered, k)?;
        Ok(pca_cell_coords(&d, &v))
    })?;
    ds.set_embedding("pca", pca.clone())?;

    let (labels, n_clusters) = timed("cluster", || {
        let knn = scflow::nn::knn(&pca.view(), config.n_neighbors.min(ds.n_cells() - 1));
        let graph = shared_nearest_neighbors(&knn.view(), config.snn_prune);
        let clustering = Louvain::new(config.resolution, Some(config.seed)).cluster(&graph);
        let labels = clustering.relabel_by_size();
        let n_clusters = clustering.num_clusters();
        info!("found {} clusters", n_clusters);
        Ok((labels, n_clusters))
    })?;
    ds.cells.cluster = labels.clone();

    timed("cluster tree", || {
        if n_clusters < 2 {
            info!("single cluster, skipping the tree");
            return Ok(());
        }
        let centroids = cluster_centroids(&pca.view(), &labels, n_clusters);
        let tree = ClusterTree::build(&centroids.view(), LinkageMethod::Ward)?;
        let merges = tree.merges();
        let mut table = DataTable::new();
        table.push("node_a", Column::Int(merges.iter().map(|m| m.a as i64).collect()))?;
        table.push("node_b", Column::Int(merges.iter().map(|m| m.b as i64).collect()))?;
        table.push("height", Column::F64(merges.iter().map(|m| m.height).collect()))?;
        table.push("size", Column::Int(merges.iter().map(|m| m.size as i64).collect()))?;
        ds.aux.tables.insert("cluster_tree".into(), table);
        ds.aux.parameters.insert(
            "cluster_tree_leaves".into(),
            tree.leaves().iter().map(usize::to_string).collect::<Vec<_>>().join(","),
        );
        Ok(())
    })?;

    timed("cell cycle", || {
        let scores = cellcycle::score_phases(&logged, &ds.counts.gene_names, config.seed)?;
        ds.cells.phase = scores
            .phases
            .iter()
            .map(|p| match p {
                PhaseCall::G1 => Phase::G1,
                PhaseCall::S => Phase::S,
                PhaseCall::G2M => Phase::G2M,
            })
            .collect();
        let mut table = DataTable::new();
        table.push("barcode", Column::Str(ds.counts.barcodes.clone()))?;
        table.push("s_score", Column::F64(scores.s_scores))?;
        table.push("g2m_score", Column::F64(scores.g2m_scores))?;
        table.push(
            "phase",
            Column::Str(ds.cells.phase.iter().map(Phase::to_string).collect()),
        )?;
        ds.aux.tables.insert("cell_cycle".into(), table);
        ds.aux
            .gene_lists
            .insert("s_genes".into(), cellcycle::S_GENES.iter().map(|s| s.to_string()).collect());
        ds.aux.gene_lists.insert(
            "g2m_genes".into(),
            cellcycle::G2M_GENES.iter().map(|s| s.to_string()).collect(),
        );
        Ok(())
    })?;

    let tsne = timed("tsne", || {
        Tsne {
            perplexity: config.tsne.perplexity,
            n_iter: config.tsne.n_iter,
            seed: config.seed,
            ..Tsne::default()
        }
        .embed(&pca.view())
    })?;
    ds.set_embedding("tsne", tsne)?;

    let umap = timed("umap", || {
        Umap {
            n_neighbors: config.umap.n_neighbors.min(ds.n_cells() - 1),
            min_dist: config.umap.min_dist,
            spread: config.umap.spread,
            seed: config.seed,
            ..Umap::default()
        }
        .embed(&pca.view(), 2)
    })?;
    ds.set_embedding("umap", umap)?;

    let cluster_markers = timed("markers", || {
        let options = RankOptions {
            top_n: config.markers.top_n,
            max_adjusted_p: config.markers.max_adjusted_p,
            big_count: None,
        };
        let cluster_markers = rank_markers(&ds.counts.matrix, &labels, n_clusters, &options);
        let table = marker_table(&cluster_markers, &ds.counts.gene_names)?;
        ds.aux.tables.insert("markers".into(), table);
        Ok(cluster_markers)
    })?;

    timed("enrichment", || {
        let Some(gmt_path) = &config.gene_sets else {
            info!("no gene-set file configured, skipping enrichment");
            return Ok(());
        };
        let sets = load_gmt(gmt_path)?;
        let options = OraOptions {
            min_overlap: 1,
            threads: config.enrichment_threads,
        };
        let enrichment = enrichment_table(&cluster_markers, &sets, &ds.counts.gene_names, &options)?;
        ds.aux.tables.insert("enrichment".into(), enrichment);
        let set_scores = set_score_table(&logged, &sets, &ds, config.seed)?;
        ds.aux.tables.insert("set_scores".into(), set_scores);
        for set in &sets {
            ds.aux.gene_lists.insert(set.name.clone(), set.genes.clone());
        }
        Ok(())
    })?;

    timed("trajectory", || {
        let options = traject::TrajectoryOptions {
            root_cluster: config.root_cluster,
        };
        let all = traject::infer(&pca.view(), &labels, n_clusters, &options)?;
        let cells = trajectory_table(&all, &ds.counts.barcodes)?;
        ds.aux.tables.insert("trajectory".into(), cells);
        ds.aux.tables.insert("trajectory_edges".into(), edge_table(&all.edges)?);
        Ok(())
    })?;

    timed("trajectory (G1 subset)", || {
        let g1_cells = ds.cells_in_phase(Phase::G1);
        if g1_cells.len() < 3 {
            info!("only {} G1 cells, skipping the G1 trajectory", g1_cells.len());
            return Ok(());
        }
        let sub = ds.select_cells(&g1_cells);
        let (sub_labels, sub_clusters) = compact_labels(&sub.cells.cluster);
        let sub_pca = sub
            .embeddings
            .get("pca")
            .ok_or_else(|| format_err!("pca embedding missing from the G1 subset"))?;
        // the configured root may be absent from the subset
        let traj = traject::infer(
            &sub_pca.view(),
            &sub_labels,
            sub_clusters,
            &traject::TrajectoryOptions { root_cluster: None },
        )?;
        let cells = trajectory_table(&traj, &sub.counts.barcodes)?;
        ds.aux.tables.insert("trajectory_g1".into(), cells);
        ds.aux.tables.insert("trajectory_g1_edges".into(), edge_table(&traj.edges)?);
        Ok(())
    })?;

    let bundle = timed("export", || mat_io::export_bundle(&ds, &config.out_dir, &config.project))?;

    timed("snapshot", || {
        let stamp = Local::now().format("%Y%m%d");
        let path = config.out_dir.join(format!("{}_{stamp}.snapshot.bin.gz", config.project));
        mat_io::write_snapshot(&ds, &path)?;
        Ok(())
    })?;

    info!("pipeline complete; bundle at {}", bundle.display());
    Ok(())
}

/// Keep only the listed rows of a CSR matrix, in the listed order.
fn select_rows(matrix: &CsMat<f64>, rows: &[usize]) -> CsMat<f64> {
    let mut indptr = Vec::with_capacity(rows.len() + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for &r in rows {
        let row = matrix.outer_view(r).expect("row in range");
        for (c, &v) in row.iter() {
            indices.push(c);
            data.push(v);
        }
        indptr.push(indices.len());
    }
    CsMat::new((rows.len(), matrix.cols()), indptr, indices, data)
}

/// Renumber labels so they are dense over the cells present.
fn compact_labels(labels: &[i16]) -> (Vec<i16>, usize) {
    let mut seen: Vec<i16> = labels.iter().copied().filter(|&l| l >= 0).collect();
    seen.sort_unstable();
    seen.dedup();
    let remap: std::collections::HashMap<i16, i16> = seen
        .iter()
        .enumerate()
        .map(|(new, &old)| (old, new as i16))
        .collect();
    let dense = labels.iter().map(|l| *remap.get(l).unwrap_or(&-1)).collect();
    (dense, seen.len())
}

fn record_parameters(ds: &mut Dataset, config: &Config) {
    let p = &mut ds.aux.parameters;
    p.insert("project".into(), config.project.clone());
    p.insert("organism".into(), config.organism.clone());
    p.insert("matrix".into(), config.matrix.display().to_string());
    p.insert("normalization".into(), config.normalization.clone());
    p.insert("mito_prefix".into(), config.mito_prefix.clone());
    p.insert("qc_min_counts".into(), config.qc.min_counts.to_string());
    p.insert("qc_min_genes".into(), config.qc.min_genes.to_string());
    p.insert("qc_max_genes".into(), config.qc.max_genes.to_string());
    p.insert("qc_max_mito_frac".into(), config.qc.max_mito_frac.to_string());
    p.insert("n_variable_genes".into(), config.n_variable_genes.to_string());
    p.insert("n_pcs".into(), config.n_pcs.to_string());
    p.insert("n_neighbors".into(), config.n_neighbors.to_string());
    p.insert("snn_prune".into(), config.snn_prune.to_string());
    p.insert("resolution".into(), config.resolution.to_string());
    p.insert("tsne_perplexity".into(), config.tsne.perplexity.to_string());
    p.insert("tsne_n_iter".into(), config.tsne.n_iter.to_string());
    p.insert("umap_n_neighbors".into(), config.umap.n_neighbors.to_string());
    p.insert("umap_min_dist".into(), config.umap.min_dist.to_string());
    p.insert("umap_spread".into(), config.umap.spread.to_string());
    p.insert("markers_top_n".into(), config.markers.top_n.to_string());
    p.insert("markers_max_adjusted_p".into(), config.markers.max_adjusted_p.to_string());
    p.insert("enrichment_threads".into(), config.enrichment_threads.to_string());
    p.insert("seed".into(), config.seed.to_string());
    if let Some(root) = config.root_cluster {
        p.insert("root_cluster".into(), root.to_string());
    }
}

fn marker_table(cluster_markers: &[ClusterMarkers], gene_names: &[String]) -> Result<DataTable, Error> {
    let mut cluster = Vec::new();
    let mut gene = Vec::new();
    let mut log2_fc = Vec::new();
    let mut p_value = Vec::new();
    let mut adjusted_p = Vec::new();
    let mut mean_in = Vec::new();
    let mut mean_out = Vec::new();
    for m in cluster_markers {
        for row in &m.rows {
            cluster.push(i64::from(m.cluster));
            gene.push(gene_names[row.gene].clone());
            log2_fc.push(row.log2_fold_change);
            p_value.push(row.p_value);
            adjusted_p.push(row.adjusted_p_value);
            mean_in.push(row.mean_in);
            mean_out.push(row.mean_out);
        }
    }
    let mut table = DataTable::new();
    table.push("cluster", Column::Int(cluster))?;
    table.push("gene", Column::Str(gene))?;
    table.push("log2_fc", Column::F64(log2_fc))?;
    table.push("p_value", Column::F64(p_value))?;
    table.push("adjusted_p_value", Column::F64(adjusted_p))?;
    table.push("mean_in", Column::F64(mean_in))?;
    table.push("mean_out", Column::F64(mean_out))?;
    Ok(table)
}

fn enrichment_table(
    cluster_markers: &[ClusterMarkers],
    sets: &[GeneSet],
    gene_names: &[String],
    options: &OraOptions,
) -> Result<DataTable, Error> {
    let mut cluster = Vec::new();
    let mut set = Vec::new();
    let mut overlap = Vec::new();
    let mut set_size = Vec::new();
    let mut expected = Vec::new();
    let mut p_value = Vec::new();
    let mut adjusted_p = Vec::new();
    for m in cluster_markers {
        let query: Vec<usize> = m.rows.iter().map(|r| r.gene).collect();
        if query.is_empty() {
            continue;
        }
        for r in ora(&query, sets, gene_names, options)? {
            cluster.push(i64::from(m.cluster));
            set.push(r.set);
            overlap.push(r.overlap as i64);
            set_size.push(r.set_size as i64);
            expected.push(r.expected);
            p_value.push(r.p_value);
            adjusted_p.push(r.adjusted_p_value);
        }
    }
    let mut table = DataTable::new();
    table.push("cluster", Column::Int(cluster))?;
    table.push("set", Column::Str(set))?;
    table.push("overlap", Column::Int(overlap))?;
    table.push("set_size", Column::Int(set_size))?;
    table.push("expected", Column::F64(expected))?;
    table.push("p_value", Column::F64(p_value))?;
    table.push("adjusted_p_value", Column::F64(adjusted_p))?;
    Ok(table)
}

fn set_score_table(logged: &CsMat<f64>, sets: &[GeneSet], ds: &Dataset, seed: u64) -> Result<DataTable, Error> {
    let mut table = DataTable::new();
    table.push("barcode", Column::Str(ds.counts.barcodes.clone()))?;
    for set in sets {
        let members = set.to_indices(&ds.counts.gene_names);
        if members.is_empty() {
            log::warn!("gene set '{}' has no genes in the matrix, skipping score", set.name);
            continue;
        }
        let scores = module_score(logged, &members, seed)?;
        table.push(&set.name, Column::F64(scores))?;
    }
    Ok(table)
}

fn trajectory_table(traj: &traject::Trajectory, barcodes: &[String]) -> Result<DataTable, Error> {
    let mut table = DataTable::new();
    table.push("barcode", Column::Str(barcodes.to_vec()))?;
    table.push("pseudotime", Column::F64(traj.pseudotime.clone()))?;
    table.push(
        "branch",
        Column::Int(traj.branch.iter().map(|&b| i64::from(b)).collect()),
    )?;
    Ok(table)
}

fn edge_table(edges: &[(usize, usize)]) -> Result<DataTable, Error> {
    let mut table = DataTable::new();
    table.push("parent", Column::Int(edges.iter().map(|&(u, _)| u as i64).collect()))?;
    table.push("child", Column::Int(edges.iter().map(|&(_, v)| v as i64).collect()))?;
    Ok(table)
}
