use crate::score::module_score;
use anyhow::{bail, Error};
use log::{info, warn};
use sprs::CsMat;

/// S-phase marker genes (Tirosh et al. 2016)
pub const S_GENES: &[&str] = &[
    "MCM5", "PCNA", "TYMS", "FEN1", "MCM2", "MCM4", "RRM1", "UNG", "GINS2", "MCM6", "CDCA7", "DTL", "PRIM1", "UHRF1",
    "CENPU", "HELLS", "RFC2", "RPA2", "NASP", "RAD51AP1", "GMNN", "WDR76", "SLBP", "CCNE2", "UBR7", "POLD3", "MSH2",
    "ATAD2", "RAD51", "RRM2", "CDC45", "CDC6", "EXO1", "TIPIN", "DSCC1", "BLM", "CASP8AP2", "USP1", "CLSPN", "POLA1",
    "CHAF1B", "BRIP1", "E2F8",
];

/// G2/M-phase marker genes (Tirosh et al. 2016)
pub const G2M_GENES: &[&str] = &[
    "HMGB2", "CDK1", "NUSAP1", "UBE2C", "BIRC5", "TPX2", "TOP2A", "NDC80", "CKS2", "NUF2", "CKS1B", "MKI67", "TMPO",
    "CENPF", "TACC3", "PIMREG", "SMC4", "CCNB2", "CKAP2L", "CKAP2", "AURKB", "BUB1", "KIF11", "ANP32E", "TUBB4B",
    "GTSE1", "KIF20B", "HJURP", "CDCA3", "JPT1", "CDC20", "TTK", "CDC25C", "KIF2C", "RANGAP1", "NCAPD2", "DLGAP5",
    "CDCA2", "CDCA8", "ECT2", "KIF23", "HMMR", "AURKA", "PSRC1", "ANLN", "LBR", "CKAP5", "CENPE", "CTCF", "NEK2",
    "G2E3", "GAS2L3", "CBX5", "CENPA",
];

/// Cell-cycle phase call derived from signature scores.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhaseCall {
    /// Neither signature positive
    G1,
    /// S score dominates
    S,
    /// G2/M score dominates
    G2M,
}

/// Per-cell cell-cycle scores and phase calls.
pub struct CellCycleScores {
    /// S-phase module score per cell
    pub s_scores: Vec<f64>,
    /// G2/M module score per cell
    pub g2m_scores: Vec<f64>,
    /// Phase call per cell
    pub phases: Vec<PhaseCall>,
}

/// Score both cell-cycle signatures over log-normalized expression
/// (genes x cells) and call a phase per cell: the larger positive score
/// wins, G1 when neither is positive.
pub fn score_phases(expr: &CsMat<f64>, gene_names: &[String], seed: u64) -> Result<CellCycleScores, Error> {
    let s_idx = resolve(S_GENES, gene_names);
    let g2m_idx = resolve(G2M_GENES, gene_names);
    if s_idx.is_empty() || g2m_idx.is_empty() {
        bail!(
            "cell-cycle genes not found in the matrix ({} S, {} G2M)",
            s_idx.len(),
            g2m_idx.len()
        );
    }
    if s_idx.len() < S_GENES.len() / 2 || g2m_idx.len() < G2M_GENES.len() / 2 {
        warn!(
            "only {}/{} S and {}/{} G2M genes present; phase calls may be noisy",
            s_idx.len(),
            S_GENES.len(),
            g2m_idx.len(),
            G2M_GENES.len()
        );
    }

    let s_scores = module_score(expr, &s_idx, seed)?;
    let g2m_scores = module_score(expr, &g2m_idx, seed.wrapping_add(1))?;

    let phases: Vec<PhaseCall> = s_scores
        .iter()
        .zip(g2m_scores.iter())
        .map(|(&s, &g2m)| {
            if s <= 0.0 && g2m <= 0.0 {
                PhaseCall::G1
            } else if s > g2m {
                PhaseCall::S
            } else {
                PhaseCall::G2M
            }
        })
        .collect();

    let (n_g1, n_s): (usize, usize) = phases.iter().fold((0, 0), |(g1, s), p| match p {
        PhaseCall::G1 => (g1 + 1, s),
        PhaseCall::S => (g1, s + 1),
        PhaseCall::G2M => (g1, s),
    });
    info!(
        "cell cycle: {} G1, {} S, {} G2M",
        n_g1,
        n_s,
        phases.len() - n_g1 - n_s
    );

    Ok(CellCycleScores {
        s_scores,
        g2m_scores,
        phases,
    })
}

fn resolve(symbols: &[&str], gene_names: &[String]) -> Vec<usize> {
    let lookup: std::collections::HashMap<String, usize> = gene_names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.to_ascii_uppercase(), i))
        .collect();
    let mut idx: Vec<usize> = symbols
        .iter()
        .filter_map(|s| lookup.get(&s.to_ascii_uppercase()).copied())
        .collect();
    idx.sort_unstable();
    idx.dedup();
    idx
}

#[cfg(test)]
mod test {
    use super::*;
    use sprs::TriMat;

    /// Matrix with real S/G2M gene names plus background genes; cells 0-1
    /// express the S set, cells 2-3 the G2M set, cells 4-5 neither.
    fn cycling_fixture() -> (CsMat<f64>, Vec<String>) {
        let mut names: Vec<String> = Vec::new();
        names.extend(S_GENES.iter().take(10).map(|s| s.to_string()));
        names.extend(G2M_GENES.iter().take(10).map(|s| s.to_string()));
        for i in 0..40 {
            names.push(format!("BG{i}"));
        }
        let cells = 6;
        let mut tri = TriMat::new((names.len(), cells));
        for g in 0..10 {
            for c in 0..2 {
                tri.add_triplet(g, c, 3.0);
            }
        }
        for g in 10..20 {
            for c in 2..4 {
                tri.add_triplet(g, c, 3.0);
            }
        }
        for g in 20..60 {
            for c in 0..cells {
                tri.add_triplet(g, c, 1.0 + 0.01 * (g % 5) as f64);
            }
        }
        (tri.to_csr(), names)
    }

    #[test]
    fn test_phase_calls() {
        let (expr, names) = cycling_fixture();
        let scores = score_phases(&expr, &names, 0).unwrap();
        assert_eq!(scores.phases[0], PhaseCall::S);
        assert_eq!(scores.phases[1], PhaseCall::S);
        assert_eq!(scores.phases[2], PhaseCall::G2M);
        assert_eq!(scores.phases[3], PhaseCall::G2M);
        assert_eq!(scores.phases[4], PhaseCall::G1);
        assert_eq!(scores.phases[5], PhaseCall::G1);
        assert!(scores.s_scores[0] > scores.s_scores[4]);
    }

    #[test]
    fn test_missing_genes_error() {
        let names: Vec<String> = (0..10).map(|i| format!("GENE{i}")).collect();
        let expr = CsMat::zero((10, 3));
        assert!(score_phases(&expr, &names, 0).is_err());
    }
}
