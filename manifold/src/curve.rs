use anyhow::{bail, Error};

/// Fit the output weight curve `f(x) = 1 / (1 + a x^(2b))` to the target
/// membership curve implied by `spread` and `min_dist`:
///
/// ```text
/// target(x) = 1                          for x <= min_dist
///           = exp(-(x - min_dist)/spread) otherwise
/// ```
///
/// Damped Gauss-Newton on a grid of 300 points over `(0, 3 * spread]`, with
/// the analytic Jacobian of `f`. Returns `(a, b)`.
pub fn fit_ab(spread: f64, min_dist: f64) -> Result<(f64, f64), Error> {
    if spread <= 0.0 || min_dist < 0.0 || min_dist >= 3.0 * spread {
        bail!("invalid curve parameters: spread {spread}, min_dist {min_dist}");
    }

    let step = spread / 100.0;
    let xs: Vec<f64> = (1..=300).map(|i| i as f64 * step).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x <= min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let mut a = 2.0;
    let mut b = 1.0;
    let mut lambda = 1.0;
    let mut ssr = sum_sq_resid(a, b, &xs, &ys);

    for _ in 0..200 {
        // normal equations J^T J + lambda I, J^T r for the two parameters
        let (mut jtj_aa, mut jtj_ab, mut jtj_bb) = (0.0, 0.0, 0.0);
        let (mut jtr_a, mut jtr_b) = (0.0, 0.0);
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            let xp = x.powf(2.0 * b);
            let f = 1.0 / (1.0 + a * xp);
            let df_da = -xp * f * f;
            let df_db = -2.0 * a * xp * x.ln() * f * f;
            let r = y - f;
            jtj_aa += df_da * df_da;
            jtj_ab += df_da * df_db;
            jtj_bb += df_db * df_db;
            jtr_a += df_da * r;
            jtr_b += df_db * r;
        }

        let (daa, dbb) = (jtj_aa + lambda, jtj_bb + lambda);
        let det = daa * dbb - jtj_ab * jtj_ab;
        if det.abs() < 1e-300 {
            break;
        }
        // levenberg step: (J^T J + lambda I) d = J^T r, with J = df/dp
        let step_a = (dbb * jtr_a - jtj_ab * jtr_b) / det;
        let step_b = (daa * jtr_b - jtj_ab * jtr_a) / det;

        let (a_new, b_new) = (a + step_a, b + step_b);
        let ssr_new = if a_new > 0.0 && b_new > 0.0 {
            sum_sq_resid(a_new, b_new, &xs, &ys)
        } else {
            f64::INFINITY
        };

        if ssr_new < ssr {
            if (ssr - ssr_new) < 1e-12 * ssr.max(1e-12) {
                a = a_new;
                b = b_new;
                break;
            }
            a = a_new;
            b = b_new;
            ssr = ssr_new;
            lambda = (lambda / 3.0).max(1e-12);
        } else {
            lambda *= 3.0;
        }
    }

    Ok((a, b))
}

fn sum_sq_resid(a: f64, b: f64, xs: &[f64], ys: &[f64]) -> f64 {
    xs.iter()
        .zip(ys.iter())
        .map(|(&x, &y)| {
            let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
            (y - f) * (y - f)
        })
        .sum()
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_reference_parameters() {
        // umap-learn's find_ab_params(1.0, 0.1) gives a=1.577, b=0.895
        let (a, b) = fit_ab(1.0, 0.1).unwrap();
        assert_approx_eq!(a, 1.577, 0.02);
        assert_approx_eq!(b, 0.895, 0.01);
    }

    #[test]
    fn test_larger_min_dist_flattens_curve() {
        let (a1, _) = fit_ab(1.0, 0.1).unwrap();
        let (a2, b2) = fit_ab(1.0, 0.5).unwrap();
        // a drops and b rises as min_dist grows
        assert!(a2 < a1);
        assert!(b2 > 1.0);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(fit_ab(0.0, 0.1).is_err());
        assert!(fit_ab(1.0, -0.5).is_err());
        assert!(fit_ab(1.0, 5.0).is_err());
    }
}
