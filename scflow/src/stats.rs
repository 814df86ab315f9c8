//! Statistics helpers shared by the preprocessing stages.

use num_traits::ToPrimitive;

/// Return the median as `f64`. Sorts its argument in place; `None` on empty
/// input.
pub fn median_mut<T>(xs: &mut [T]) -> Option<f64>
where
    T: Copy + PartialOrd + ToPrimitive,
{
    if xs.is_empty() {
        return None;
    }
    xs.sort_unstable_by(|a, b| a.partial_cmp(b).expect("unordered value in median input"));
    let mid = xs.len() / 2;
    let v = if xs.len() % 2 == 0 {
        (xs[mid - 1].to_f64().unwrap() + xs[mid].to_f64().unwrap()) / 2.0
    } else {
        xs[mid].to_f64().unwrap()
    };
    Some(v)
}

/// Mean and population variance (ddof 0) of a slice. Returns `(0, 0)` on
/// empty input.
pub fn mean_var(xs: &[f64]) -> (f64, f64) {
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / n;
    (mean, var)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_median_mut() {
        assert_eq!(median_mut::<u32>(&mut []), None);
        assert_eq!(median_mut(&mut [1u32]), Some(1.0));
        assert_eq!(median_mut(&mut [1u32, 10]), Some(5.5));
        assert_eq!(median_mut(&mut [100u32, 1, 10]), Some(10.0));
        assert_eq!(median_mut(&mut [1000.0, 1.0, 100.0, 10.0]), Some(55.0));
    }

    #[test]
    fn test_mean_var() {
        let (mean, var) = mean_var(&[1.0, 2.0, 4.0, 3.0, 5.0, 6.0]);
        assert_approx_eq!(mean, 3.5, 1e-12);
        assert_approx_eq!(var, 2.9166666666666665, 1e-12);
    }
}
