//! Minimal statistics over slices, used by the sSeq parameter estimation.

use num_traits::ToPrimitive;
use std::cmp::Ordering;

/// `mean`, `percentile` and `median` over numeric slices.
pub trait Statistics {
    /// Arithmetic mean
    fn mean(&self) -> f64;
    /// The value below which `pct` percent of the values fall, with linear
    /// interpolation between order statistics
    fn percentile(&self, pct: f64) -> f64;
    /// 50th percentile
    fn median(&self) -> f64 {
        self.percentile(50.0)
    }
}

impl<T: Copy + PartialOrd + ToPrimitive> Statistics for [T] {
    fn mean(&self) -> f64 {
        assert!(!self.is_empty());
        self.iter().map(|v| v.to_f64().unwrap()).sum::<f64>() / self.len() as f64
    }

    fn percentile(&self, pct: f64) -> f64 {
        assert!(!self.is_empty());
        assert!((0.0..=100.0).contains(&pct));
        let mut sorted: Vec<T> = self.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        percentile_of_sorted(&sorted, pct)
    }
}

fn percentile_of_sorted<T: ToPrimitive>(sorted: &[T], pct: f64) -> f64 {
    if sorted.len() == 1 || pct == 100.0 {
        return sorted[sorted.len() - 1].to_f64().unwrap();
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lo_rank = rank.floor();
    let frac = rank - lo_rank;
    let n = lo_rank as usize;
    let lo = sorted[n].to_f64().unwrap();
    let hi = sorted[n + 1].to_f64().unwrap();
    lo + (hi - lo) * frac
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_stats() {
        let v = vec![1, 2, 4, 3, 5, 6];
        assert_approx_eq!(v.mean(), 3.5, 1e-12);
        assert_approx_eq!(v.median(), 3.5, 1e-12);
        assert_approx_eq!(v.percentile(0.95), 1.0475, 1e-12);
        assert_approx_eq!(v.percentile(100.0), 6.0, 1e-12);
        assert_approx_eq!([7.0].percentile(40.0), 7.0, 1e-12);
    }
}
