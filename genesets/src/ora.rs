use crate::gmt::GeneSet;
use anyhow::{bail, Error};
use markers::dist::adjusted_pvalue_bh;
use rayon::prelude::*;
use statrs::function::gamma::ln_gamma;
use std::collections::HashSet;

/// Options for over-representation analysis.
#[derive(Clone, Copy, Debug)]
pub struct OraOptions {
    /// Minimum overlap for a set to be scored
    pub min_overlap: usize,
    /// Worker threads; 1 runs strictly sequentially
    pub threads: usize,
}

impl Default for OraOptions {
    fn default() -> Self {
        OraOptions {
            min_overlap: 1,
            threads: 1,
        }
    }
}

/// Enrichment result for one gene set.
#[derive(Clone, Debug)]
pub struct OraResult {
    /// Gene set name
    pub set: String,
    /// Observed overlap with the query (k)
    pub overlap: usize,
    /// Effective set size within the universe (K)
    pub set_size: usize,
    /// Expected overlap under the null
    pub expected: f64,
    /// Hypergeometric upper-tail p-value, P(X >= k)
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted p-value
    pub adjusted_p_value: f64,
}

/// Hypergeometric over-representation of `query` gene indices in each gene
/// set, against a universe of `n_universe` genes.
///
/// Sets are resolved against `gene_names` (symbols absent from the matrix
/// are ignored), scored with the upper-tail hypergeometric test, adjusted
/// with Benjamini-Hochberg, and returned sorted by p-value.
pub fn ora(
    query: &[usize],
    sets: &[GeneSet],
    gene_names: &[String],
    options: &OraOptions,
) -> Result<Vec<OraResult>, Error> {
    let n_universe = gene_names.len();
    if n_universe == 0 {
        bail!("empty gene universe");
    }
    if let Some(&bad) = query.iter().find(|&&g| g >= n_universe) {
        bail!("query gene index {} outside universe of {}", bad, n_universe);
    }

    let query_set: HashSet<usize> = query.iter().copied().collect();
    let n_query = query_set.len();

    let score_one = |set: &GeneSet| -> Option<OraResult> {
        let members = set.to_indices(gene_names);
        let set_size = members.len();
        let overlap = members.iter().filter(|g| query_set.contains(g)).count();
        if set_size == 0 || overlap < options.min_overlap {
            return None;
        }
        Some(OraResult {
            set: set.name.clone(),
            overlap,
            set_size,
            expected: n_query as f64 * set_size as f64 / n_universe as f64,
            p_value: hypergeometric_upper_tail(n_universe, set_size, n_query, overlap),
            adjusted_p_value: 1.0,
        })
    };

    let mut results: Vec<OraResult> = if options.threads > 1 {
        sets.par_iter().filter_map(score_one).collect()
    } else {
        sets.iter().filter_map(score_one).collect()
    };

    let raw: Vec<(usize, f64)> = results.iter().map(|r| r.p_value).enumerate().collect();
    for (i, q) in adjusted_pvalue_bh(&raw) {
        results[i].adjusted_p_value = q;
    }
    results.sort_by(|a, b| a.p_value.total_cmp(&b.p_value).then(a.set.cmp(&b.set)));
    Ok(results)
}

/// `P(X >= k)` for `X ~ Hypergeometric(N, K, n)`, summed in log space.
fn hypergeometric_upper_tail(n_total: usize, k_set: usize, n_draw: usize, k_obs: usize) -> f64 {
    let hi = k_set.min(n_draw);
    if k_obs > hi {
        return 0.0;
    }
    let denom = ln_choose(n_total, n_draw);
    let mut p = 0.0;
    for i in k_obs..=hi {
        if n_draw < i || n_total - k_set < n_draw - i {
            continue;
        }
        let ln_p = ln_choose(k_set, i) + ln_choose(n_total - k_set, n_draw - i) - denom;
        p += ln_p.exp();
    }
    p.min(1.0)
}

fn ln_choose(n: usize, k: usize) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    ln_gamma(n as f64 + 1.0) - ln_gamma(k as f64 + 1.0) - ln_gamma((n - k) as f64 + 1.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn universe(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("G{i}")).collect()
    }

    fn set(name: &str, genes: &[usize]) -> GeneSet {
        GeneSet {
            name: name.into(),
            description: String::new(),
            genes: genes.iter().map(|g| format!("G{g}")).collect(),
        }
    }

    #[test]
    fn test_perfect_overlap_p_value() {
        // drawing 2 of 10 and hitting the whole 2-gene set:
        // p = C(2,2) * C(8,0) / C(10,2) = 1/45
        let names = universe(10);
        let results = ora(&[0, 1], &[set("hit", &[0, 1])], &names, &OraOptions::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].overlap, 2);
        assert_approx_eq!(results[0].p_value, 1.0 / 45.0, 1e-12);
    }

    #[test]
    fn test_enriched_set_ranks_first() {
        let names = universe(100);
        let query = [0, 1, 2, 3, 4];
        let sets = vec![
            set("pathway_a", &[0, 1, 2, 10, 11]),
            set("pathway_b", &[50, 51, 52, 53, 54]),
        ];
        let results = ora(
            &query,
            &sets,
            &names,
            &OraOptions {
                min_overlap: 0,
                threads: 1,
            },
        )
        .unwrap();
        assert_eq!(results[0].set, "pathway_a");
        assert_eq!(results[0].overlap, 3);
        assert!(results[0].p_value < results[1].p_value);
        assert_approx_eq!(results[0].expected, 5.0 * 5.0 / 100.0, 1e-12);
        // BH never lowers a p-value
        for r in &results {
            assert!(r.adjusted_p_value >= r.p_value);
        }
    }

    #[test]
    fn test_threads_agree() {
        let names = universe(200);
        let query: Vec<usize> = (0..20).collect();
        let sets: Vec<GeneSet> = (0..10)
            .map(|i| set(&format!("s{i}"), &[i, i + 5, i + 20, i + 100]))
            .collect();
        let serial = ora(&query, &sets, &names, &OraOptions { min_overlap: 1, threads: 1 }).unwrap();
        let parallel = ora(&query, &sets, &names, &OraOptions { min_overlap: 1, threads: 4 }).unwrap();
        assert_eq!(serial.len(), parallel.len());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_eq!(a.set, b.set);
            assert_approx_eq!(a.p_value, b.p_value, 1e-14);
        }
    }

    #[test]
    fn test_bad_query() {
        let names = universe(5);
        assert!(ora(&[7], &[set("x", &[0])], &names, &OraOptions::default()).is_err());
    }

    #[test]
    fn test_upper_tail_sums_to_one_from_zero() {
        // from k = 0 the tail covers the whole distribution
        assert_approx_eq!(hypergeometric_upper_tail(30, 10, 8, 0), 1.0, 1e-12);
    }
}
