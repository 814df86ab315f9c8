use crate::sseq::{compute_sseq_params, sseq_differential_expression, SSeqParams};
use log::info;
use noisy_float::types::n64;
use sprs::CsMat;

/// Options for marker ranking
#[derive(Clone, Copy, Debug)]
pub struct RankOptions {
    /// Keep at most this many genes per cluster
    pub top_n: usize,
    /// Adjusted p-value cutoff for reporting
    pub max_adjusted_p: f64,
    /// Count threshold for switching to the asymptotic test
    pub big_count: Option<u64>,
}

impl Default for RankOptions {
    fn default() -> Self {
        RankOptions {
            top_n: 50,
            max_adjusted_p: 0.05,
            big_count: None,
        }
    }
}

/// One ranked marker gene
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerRow {
    /// Row index of the gene in the count matrix
    pub gene: usize,
    /// log2 fold change, cluster over rest
    pub log2_fold_change: f64,
    /// raw p-value
    pub p_value: f64,
    /// BH adjusted p-value
    pub adjusted_p_value: f64,
    /// normalized mean expression within the cluster
    pub mean_in: f64,
    /// normalized mean expression outside the cluster
    pub mean_out: f64,
}

/// Ranked markers of one cluster
#[derive(Clone, Debug)]
pub struct ClusterMarkers {
    /// The cluster label
    pub cluster: i16,
    /// Up-regulated genes, most significant first
    pub rows: Vec<MarkerRow>,
}

/// Rank marker genes for every cluster, one-vs-rest.
///
/// sSeq parameters are estimated once on all cells and shared across the
/// comparisons. Only up-regulated genes below the adjusted p-value cutoff
/// are reported, ordered by adjusted p-value, then raw p-value, then fold
/// change.
pub fn rank_markers(mat: &CsMat<u32>, labels: &[i16], n_clusters: usize, options: &RankOptions) -> Vec<ClusterMarkers> {
    assert_eq!(mat.cols(), labels.len());
    let params: SSeqParams = compute_sseq_params(mat, None, None);

    let mut out = Vec::with_capacity(n_clusters);
    for cluster in 0..n_clusters as i16 {
        let mut cond_a = Vec::new();
        let mut cond_b = Vec::new();
        for (cell, &label) in labels.iter().enumerate() {
            if label == cluster {
                cond_a.push(cell);
            } else {
                cond_b.push(cell);
            }
        }
        if cond_a.is_empty() || cond_b.is_empty() {
            out.push(ClusterMarkers {
                cluster,
                rows: Vec::new(),
            });
            continue;
        }

        info!(
            "ranking markers for cluster {} ({} vs {} cells)",
            cluster,
            cond_a.len(),
            cond_b.len()
        );
        let de = sseq_differential_expression(mat, &cond_a, &cond_b, &params, options.big_count);

        let mut rows: Vec<MarkerRow> = (0..mat.rows())
            .filter(|&g| {
                de.genes_tested[g]
                    && de.log2_fold_change[g] > 0.0
                    && de.adjusted_p_values[g] <= options.max_adjusted_p
            })
            .map(|g| MarkerRow {
                gene: g,
                log2_fold_change: de.log2_fold_change[g],
                p_value: de.p_values[g],
                adjusted_p_value: de.adjusted_p_values[g],
                mean_in: de.normalized_mean_in[g],
                mean_out: de.normalized_mean_out[g],
            })
            .collect();
        rows.sort_by_key(|r| {
            (
                n64(r.adjusted_p_value),
                n64(r.p_value),
                -n64(r.log2_fold_change),
                r.gene,
            )
        });
        rows.truncate(options.top_n);
        out.push(ClusterMarkers { cluster, rows });
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sseq::test::to_sparse;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn test_rank_markers_two_clusters() {
        // gene 0 marks cluster 0, gene 1 marks cluster 1, gene 2 is flat
        let mut rng = Pcg64Mcg::seed_from_u64(4);
        let cells = 60;
        let genes = 10;
        let mut dense = vec![vec![0u32; cells]; genes];
        for (g, row) in dense.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                let base = rng.gen_range(1..6);
                *v = match (g, c < 30) {
                    (0, true) => base + 25,
                    (1, false) => base + 25,
                    _ => base,
                };
            }
        }
        let mat = to_sparse(genes, cells, &dense);
        let labels: Vec<i16> = (0..cells).map(|c| if c < 30 { 0 } else { 1 }).collect();

        let markers = rank_markers(&mat, &labels, 2, &RankOptions::default());
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].cluster, 0);
        assert_eq!(markers[0].rows[0].gene, 0);
        assert_eq!(markers[1].rows[0].gene, 1);
        // markers are up-regulated in their own cluster
        for m in &markers {
            for row in &m.rows {
                assert!(row.log2_fold_change > 0.0);
                assert!(row.mean_in > row.mean_out);
            }
        }
    }

    #[test]
    fn test_empty_cluster_yields_no_rows() {
        let mat = to_sparse(2, 4, &[vec![1, 2, 3, 4], vec![4, 3, 2, 1]]);
        let labels = vec![0i16, 0, 0, 0];
        let markers = rank_markers(&mat, &labels, 2, &RankOptions::default());
        assert_eq!(markers.len(), 2);
        assert!(markers[1].rows.is_empty());
        // cluster 0 has no "rest" either
        assert!(markers[0].rows.is_empty());
    }
}
