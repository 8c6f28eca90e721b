use serde::Serialize;

/// Fixed logarithmic bucket layout.
///
/// Bucket `i` covers `[base^i, base^(i+1))` nanoseconds, except that bucket
/// `0` also absorbs everything below `1ns` and the last bucket absorbs
/// everything above its lower bound. The layout never changes once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogBuckets {
    base: f64,
    ln_base: f64,
    /// `bucket_count + 1` lower bounds; `bounds[i + 1]` is bucket `i`'s upper bound.
    bounds: Vec<f64>,
}

impl LogBuckets {
    /// Callers validate `base > 1` beforehand (see
    /// `AggregatorConfig::validate`). There is always at least one bucket.
    pub fn new(base: f64, bucket_count: usize) -> Self {
        let bounds = (0..=bucket_count.max(1))
            .map(|i| base.powi(i as i32))
            .collect();
        Self {
            base,
            ln_base: base.ln(),
            bounds,
        }
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Worst-case relative over-estimate of a quantile read from this layout.
    pub fn relative_error(&self) -> f64 {
        self.base - 1.0
    }

    /// Upper boundary of bucket `index`, in nanoseconds.
    pub fn upper_bound(&self, index: usize) -> f64 {
        self.bounds[(index + 1).min(self.bounds.len() - 1)]
    }

    pub fn lower_bound(&self, index: usize) -> f64 {
        self.bounds[index.min(self.bounds.len() - 1)]
    }

    /// Bucket for a duration of `nanos`. O(1): one logarithm plus a
    /// correction step against the precomputed bounds.
    pub fn index_of(&self, nanos: u64) -> usize {
        let last = self.len() - 1;
        if nanos <= 1 {
            return 0;
        }
        let value = nanos as f64;
        let estimate = (value.ln() / self.ln_base).floor();
        let mut idx = if estimate <= 0.0 {
            0
        } else {
            (estimate as usize).min(last)
        };

        // float rounding can land one bucket off near a boundary
        while idx < last && self.bounds[idx + 1] <= value {
            idx += 1;
        }
        while idx > 0 && self.bounds[idx] > value {
            idx -= 1;
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_land_inside_their_bucket_bounds() {
        let buckets = LogBuckets::new(1.15, 192);
        for nanos in [2u64, 7, 100, 1_000, 65_536, 1_000_000, 30_000_000_000] {
            let idx = buckets.index_of(nanos);
            assert!(buckets.lower_bound(idx) <= nanos as f64, "{nanos}");
            assert!((nanos as f64) < buckets.upper_bound(idx), "{nanos}");
        }
    }

    #[test]
    fn tiny_and_huge_values_collapse_into_edge_buckets() {
        let buckets = LogBuckets::new(2.0, 10);
        assert_eq!(buckets.index_of(0), 0);
        assert_eq!(buckets.index_of(1), 0);
        assert_eq!(buckets.index_of(u64::MAX), 9);
        assert_eq!(buckets.index_of(1 << 40), 9);
    }

    #[test]
    fn exact_powers_open_a_new_bucket() {
        let buckets = LogBuckets::new(2.0, 20);
        assert_eq!(buckets.index_of(2), 1);
        assert_eq!(buckets.index_of(3), 1);
        assert_eq!(buckets.index_of(4), 2);
        assert_eq!(buckets.index_of(1024), 10);
        assert_eq!(buckets.index_of(1023), 9);
    }

    #[test]
    fn zero_count_still_has_one_bucket() {
        let buckets = LogBuckets::new(2.0, 0);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets.index_of(0), 0);
        assert_eq!(buckets.index_of(1_000_000_000), 0);
    }
}
