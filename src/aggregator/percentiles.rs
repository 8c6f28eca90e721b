use serde::Serialize;

use super::AggregatorSnapshot;

/// A percentile breakdown for one metric key, in nanoseconds.
/// Serialized straight into the JSON exposition and the SSE feed.
///
/// Every percentile is a bucket upper bound, i.e. an over-estimate within
/// the layout's relative error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileSet {
    pub count: u64,
    pub sum_ns: u64,
    pub mean_ns: f64,
    pub p50_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
}

impl PercentileSet {
    /// Returns zeroed values if the snapshot is empty.
    pub fn from_snapshot(snap: &AggregatorSnapshot) -> Self {
        if snap.count == 0 {
            return Self::empty();
        }

        let at = |q: f64| {
            snap.quantile(q)
                .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                .unwrap_or(0)
        };

        Self {
            count: snap.count,
            sum_ns: snap.sum_ns,
            mean_ns: snap.sum_ns as f64 / snap.count as f64,
            p50_ns: at(0.50),
            p90_ns: at(0.90),
            p99_ns: at(0.99),
            p999_ns: at(0.999),
        }
    }

    /// All-zero placeholder used before any samples are recorded.
    pub fn empty() -> Self {
        Self {
            count: 0,
            sum_ns: 0,
            mean_ns: 0.0,
            p50_ns: 0,
            p90_ns: 0,
            p99_ns: 0,
            p999_ns: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::config::AggregatorConfig;
    use std::time::Duration;

    #[test]
    fn percentiles_are_ordered() {
        let agg = Aggregator::new(&AggregatorConfig::default());
        for us in 1..=1_000u64 {
            agg.ingest(Duration::from_micros(us));
        }
        let set = PercentileSet::from_snapshot(&agg.snapshot());
        assert!(set.has_data());
        assert!(set.p50_ns <= set.p90_ns);
        assert!(set.p90_ns <= set.p99_ns);
        assert!(set.p99_ns <= set.p999_ns);
        assert!((set.mean_ns - 500_500.0).abs() < 1.0);
    }

    #[test]
    fn empty_snapshot_yields_zeroes() {
        let agg = Aggregator::new(&AggregatorConfig::default());
        let set = PercentileSet::from_snapshot(&agg.snapshot());
        assert!(!set.has_data());
        assert_eq!(set, PercentileSet::empty());
    }
}
