use statrs::distribution::{Beta, ContinuousCDF};
use statrs::function::gamma::ln_gamma;
use std::cmp::Ordering;

/// Log(PMF) of the negative binomial distribution with mean `mu` and
/// dispersion `phi`, conveniently parameterized.
#[inline]
pub fn negative_binomial_log_pmf(k: f64, mu: f64, phi: f64) -> f64 {
    let r = 1.0 / phi;
    ln_gamma(r + k) - (ln_gamma(r) + ln_gamma(k + 1.0)) + k * (mu / (r + mu)).ln() + r * (r / (r + mu)).ln()
}

/// Benjamini-Hochberg adjustment over `(index, p)` pairs; the indices ride
/// along so a caller can adjust a tested subset and scatter the results
/// back.
#[inline]
pub fn adjusted_pvalue_bh(pvalue: &[(usize, f64)]) -> Vec<(usize, f64)> {
    // sort descending, NaNs first so they take the harshest correction
    let mut arr = pvalue.to_vec();
    arr.sort_by(|&(_, a), &(_, b)| match a.partial_cmp(&b) {
        Some(o) => o.reverse(),
        None => {
            if a.is_nan() && b.is_nan() {
                Ordering::Equal
            } else if a.is_nan() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    });

    // q = min(1, running minimum of p * n / rank), walking down
    let len = arr.len() as f64;
    let mut min = f64::MAX;
    for (idx, (_, val)) in arr.iter_mut().enumerate() {
        *val *= len / (len - idx as f64);
        if *val < min {
            min = *val;
        }
        *val = min.min(1.0);
    }

    arr
}

fn beta_cdf(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    match Beta::new(a, b) {
        Ok(dist) => dist.cdf(x),
        Err(_) => 1.0,
    }
}

/// Exact pairwise test: the probability that a random split of `x_a + x_b`
/// under the null is at least as extreme as the observed one.
#[inline]
pub fn nb_exact_test(x_a: u64, x_b: u64, size_factor_a: f64, size_factor_b: f64, mu: f64, phi: f64) -> f64 {
    if x_a + x_b == 0 || phi == 0.0 || size_factor_a == 0.0 || size_factor_b == 0.0 {
        return 1.0;
    }

    let log_p_all = log_prob_all(x_a + x_b, size_factor_a, size_factor_b, mu, 1.0 / phi);
    let log_p_obs = log_p_all[x_a as usize];

    // two log-sum-exps folded together: one over everything, one over the
    // outcomes at most as likely as the observation
    let mut max_all = f64::NEG_INFINITY;
    let mut max_ext = f64::NEG_INFINITY;
    for &x in &log_p_all {
        if x <= log_p_obs {
            max_ext = max_ext.max(x);
        }
        max_all = max_all.max(x);
    }

    let mut sum_all = 0.0;
    let mut sum_ext = 0.0;
    for &x in &log_p_all {
        if x <= log_p_obs {
            sum_ext += (x - max_ext).exp();
        }
        sum_all += (x - max_all).exp();
    }

    ((sum_ext.ln() + max_ext) - (sum_all.ln() + max_all)).exp()
}

/// Fast beta approximation to the conditional joint distribution of
/// `(x_a, x_b)` (Robinson & Smyth 2008), used once counts are large enough
/// that the exact test's O(count) sum would dominate.
#[inline]
pub fn nb_asymptotic_test(
    count_a: u64,
    count_b: u64,
    size_factor_a: f64,
    size_factor_b: f64,
    mu: f64,
    phi: f64,
) -> f64 {
    let alpha = size_factor_a * mu / (1.0 + phi * mu);
    let beta = (size_factor_b / size_factor_a) * alpha;

    let x_a = count_a as f64;
    let x_b = count_b as f64;
    let total = x_a + x_b;

    let median = match Beta::new(alpha, beta) {
        Ok(dist) => dist.inverse_cdf(0.5),
        Err(_) => return 1.0,
    };

    if (x_a + 0.5) / total < median {
        2.0 * beta_cdf(alpha, beta, (x_a + 0.5) / total)
    } else {
        2.0 * beta_cdf(beta, alpha, (x_b + 0.5) / total)
    }
}

/// Log-probabilities of every split of `count` between the two conditions.
#[inline]
fn log_prob_all(count: u64, sa: f64, sb: f64, mu: f64, r: f64) -> Vec<f64> {
    let mut total = Vec::with_capacity(count as usize + 1);
    let x = count as f64;
    let mut j = x;

    // the split-independent part; it cancels in the exact-test ratio, so
    // only relative values matter here
    let shared = x * (mu / (r + mu)).ln() + (sa + sb) * (r / (r + mu)).ln() - ln_gamma(sa * r) - ln_gamma(sb * r);

    for idx in 0..=count {
        let a_x = idx as f64;
        let t = ln_gamma(sa * r + a_x) + ln_gamma(sb * r + j) - (ln_gamma(a_x + 1.0) + ln_gamma(j + 1.0));
        total.push(t + shared);
        j -= 1.0;
    }
    total
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_adjusted_pvalue_bh() {
        let p_values = [
            0.34f64, 0.594, 0.212, 0.384, 0.074, 0.94, 0.275, 0.696, 0.269, 0.341, 0.06, 0.008, 0.569, 0.986, 0.042,
            0.251, 0.942, 0.222, 0.762, 0.001, 0.975, 0.216, 0.205, 0.041, 0.039,
        ];
        let input: Vec<(usize, f64)> = p_values.iter().copied().enumerate().collect();

        let expected = vec![
            0.5328125f64,
            0.781578947368421,
            0.49107142857142866,
            0.5647058823529413,
            0.2642857142857143,
            0.986,
            0.49107142857142866,
            0.8699999999999999,
            0.49107142857142866,
            0.5328125,
            0.25,
            0.1,
            0.781578947368421,
            0.986,
            0.21000000000000002,
            0.49107142857142866,
            0.986,
            0.49107142857142866,
            0.9071428571428571,
            0.025,
            0.986,
            0.49107142857142866,
            0.49107142857142866,
            0.21000000000000002,
            0.21000000000000002,
        ];

        let mut adjusted = adjusted_pvalue_bh(&input);
        adjusted.sort_by_key(|&(i, _)| i);
        for ((_, got), want) in adjusted.into_iter().zip(expected) {
            assert_approx_eq!(got, want, 1e-12);
        }
    }

    #[test]
    fn test_log_prob_all() {
        let res = log_prob_all(10, 2.0, 3.0, 3.0, 0.5);
        let expected = vec![
            -9.962687402422226f64,
            -10.011477566591564,
            -10.065544787861924,
            -10.126169409678283,
            -10.195162281165276,
            -10.27520498883885,
            -10.370515168643138,
            -10.488298204299513,
            -10.642448884126784,
            -10.865592435440986,
            -11.271057543549151,
        ];
        for (&e, &r) in expected.iter().zip(&res) {
            assert_approx_eq!(e, r, 1e-5);
        }
    }

    #[test]
    fn test_nb_exact_test() {
        let res = nb_exact_test(
            6,
            3,
            885.743_286_299_499_5,
            2023.055530268548,
            0.0029272959469517066,
            27.024221110009037,
        );
        assert_approx_eq!(0.03254f64, res, 0.00001f64);
    }

    #[test]
    fn test_nb_exact_test_degenerate() {
        assert_eq!(nb_exact_test(0, 0, 1.0, 1.0, 0.5, 1.0), 1.0);
        assert_eq!(nb_exact_test(3, 1, 0.0, 1.0, 0.5, 1.0), 1.0);
        assert_eq!(nb_exact_test(3, 1, 1.0, 1.0, 0.5, 0.0), 1.0);
    }

    #[test]
    fn test_nb_asymptotic_test() {
        let res = nb_asymptotic_test(
            1792,
            1436,
            885.743_286_299_499_5,
            2023.055530268548,
            1.0159265507499822,
            29.483072138841884,
        );
        assert_approx_eq!(7.2549e-07, res, 1e-10f64);
    }
}
