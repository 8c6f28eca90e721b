//! Quantile engine: a sharded logarithmic histogram.
//!
//! Ingestion picks a shard from a per-thread hint and takes only that
//! shard's lock, so concurrent units of work rarely contend. Each shard
//! updates `count`, `sum` and its bucket under one lock, which means a
//! snapshot (locking shards one at a time) can never see a count without
//! its bucket. Samples racing a snapshot may land on either side of it.
//!
//! Quantiles are estimates. [`AggregatorSnapshot::quantile`] returns the
//! *upper* boundary of the bucket holding the requested rank, so it
//! over-estimates by at most `base - 1` relative to the true value.

pub mod buckets;
pub mod percentiles;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::AggregatorConfig;
use crate::error::MergeError;

pub use buckets::LogBuckets;
pub use percentiles::PercentileSet;

static NEXT_SHARD_HINT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SHARD_HINT: usize = NEXT_SHARD_HINT.fetch_add(1, Ordering::Relaxed);
}

// ─── Shard ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Shard {
    count: u64,
    sum_ns: u64,
    counts: Vec<u64>,
}

impl Shard {
    fn new(bucket_count: usize) -> Self {
        Self {
            count: 0,
            sum_ns: 0,
            counts: vec![0; bucket_count],
        }
    }
}

/// Keeps neighbouring shard locks on separate cache lines.
#[repr(align(64))]
#[derive(Debug)]
struct PaddedShard(Mutex<Shard>);

// ─── Aggregator ──────────────────────────────────────────────────

/// Concurrent duration histogram for one metric key.
#[derive(Debug)]
pub struct Aggregator {
    layout: Arc<LogBuckets>,
    shards: Box<[PaddedShard]>,
}

impl Aggregator {
    /// An invalid `config` is replaced by the defaults (and logged) rather
    /// than failing the unit of work that triggered the creation.
    pub fn new(config: &AggregatorConfig) -> Self {
        let config = config.or_default();
        let layout = Arc::new(LogBuckets::new(config.base, config.bucket_count));
        let shards = (0..config.shards.max(1))
            .map(|_| PaddedShard(Mutex::new(Shard::new(layout.len()))))
            .collect();
        Self { layout, shards }
    }

    pub fn layout(&self) -> &LogBuckets {
        &self.layout
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Record one duration. Out-of-range values are clamped into the edge
    /// buckets, never rejected.
    pub fn ingest(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let idx = self.layout.index_of(nanos);
        let shard = SHARD_HINT.with(|hint| *hint) % self.shards.len();

        let mut guard = self.shards[shard].0.lock();
        guard.count += 1;
        guard.sum_ns = guard.sum_ns.saturating_add(nanos);
        guard.counts[idx] += 1;
    }

    /// Point-in-time copy, merged across shards.
    pub fn snapshot(&self) -> AggregatorSnapshot {
        let mut snap = AggregatorSnapshot::empty(self.layout.clone());
        for shard in self.shards.iter() {
            let guard = shard.0.lock();
            snap.count += guard.count;
            snap.sum_ns = snap.sum_ns.saturating_add(guard.sum_ns);
            for (total, n) in snap.buckets.iter_mut().zip(&guard.counts) {
                *total += n;
            }
        }
        snap
    }

    /// Folds `other`'s current contents into this aggregator, e.g. to
    /// combine per-worker aggregators into one.
    pub fn merge_from(&self, other: &Aggregator) -> Result<(), MergeError> {
        check_layout(&self.layout, &other.layout)?;
        let incoming = other.snapshot();

        let mut guard = self.shards[0].0.lock();
        guard.count += incoming.count;
        guard.sum_ns = guard.sum_ns.saturating_add(incoming.sum_ns);
        for (total, n) in guard.counts.iter_mut().zip(&incoming.buckets) {
            *total += n;
        }
        Ok(())
    }
}

fn check_layout(left: &LogBuckets, right: &LogBuckets) -> Result<(), MergeError> {
    if left == right {
        Ok(())
    } else {
        Err(MergeError::LayoutMismatch {
            left: left.base(),
            left_len: left.len(),
            right: right.base(),
            right_len: right.len(),
        })
    }
}

// ─── Snapshot ────────────────────────────────────────────────────

/// Immutable `{count, sum, bucket_counts}` copy of an [`Aggregator`].
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorSnapshot {
    pub count: u64,
    pub sum_ns: u64,
    pub buckets: Vec<u64>,
    layout: Arc<LogBuckets>,
}

impl AggregatorSnapshot {
    fn empty(layout: Arc<LogBuckets>) -> Self {
        Self {
            count: 0,
            sum_ns: 0,
            buckets: vec![0; layout.len()],
            layout,
        }
    }

    pub fn layout(&self) -> &LogBuckets {
        &self.layout
    }

    pub fn sum(&self) -> Duration {
        Duration::from_nanos(self.sum_ns)
    }

    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_nanos(self.sum_ns / self.count))
    }

    /// Pairwise bucket sum plus count/sum sum. Associative and commutative.
    pub fn merge(&mut self, other: &AggregatorSnapshot) -> Result<(), MergeError> {
        check_layout(&self.layout, &other.layout)?;
        self.count += other.count;
        self.sum_ns = self.sum_ns.saturating_add(other.sum_ns);
        for (total, n) in self.buckets.iter_mut().zip(&other.buckets) {
            *total += n;
        }
        Ok(())
    }

    /// Estimate of the `q`-quantile (`q` in `[0, 1]`, clamped).
    ///
    /// Walks buckets smallest first until the running count reaches
    /// `ceil(q * count)` and returns that bucket's upper boundary. The result
    /// is deliberately an over-estimate: for a true quantile `Q` it lies in
    /// `[Q, Q * base]`. Values that were clamped into the last bucket report
    /// that bucket's upper boundary. `None` when nothing was recorded.
    pub fn quantile(&self, q: f64) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let q = if q.is_nan() { 0.0 } else { q.clamp(0.0, 1.0) };
        let rank = ((q * self.count as f64).ceil() as u64).clamp(1, self.count);

        let mut seen = 0u64;
        for (idx, n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= rank {
                let upper = self.layout.upper_bound(idx).ceil();
                return Some(Duration::from_nanos(upper as u64));
            }
        }
        // unreachable when bucket totals match count; fall back to the top
        let upper = self.layout.upper_bound(self.buckets.len() - 1).ceil();
        Some(Duration::from_nanos(upper as u64))
    }

    /// Non-empty buckets as `(upper_bound_ns, cumulative_count)`.
    pub fn cumulative_buckets(&self) -> Vec<(u64, u64)> {
        let mut running = 0u64;
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(idx, n)| {
                running += n;
                (self.layout.upper_bound(idx).ceil() as u64, running)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config(base: f64, bucket_count: usize) -> AggregatorConfig {
        AggregatorConfig {
            base,
            bucket_count,
            shards: 4,
        }
    }

    #[test]
    fn five_request_scenario() {
        let agg = Aggregator::new(&config(1.1, 256));
        for ms in [10, 20, 30, 40, 50] {
            agg.ingest(Duration::from_millis(ms));
        }
        let snap = agg.snapshot();
        assert_eq!(snap.count, 5);
        assert_eq!(snap.sum(), Duration::from_millis(150));

        let p50 = snap.quantile(0.5).unwrap();
        let truth = Duration::from_millis(30);
        assert!(p50 >= truth);
        assert!(p50.as_secs_f64() - truth.as_secs_f64() <= truth.as_secs_f64() * 0.1);
    }

    #[test]
    fn empty_snapshot_has_no_quantiles() {
        let agg = Aggregator::new(&config(1.15, 64));
        let snap = agg.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.quantile(0.99), None);
        assert_eq!(snap.mean(), None);
    }

    #[test]
    fn out_of_range_durations_are_kept() {
        let agg = Aggregator::new(&config(2.0, 8));
        agg.ingest(Duration::ZERO);
        agg.ingest(Duration::from_secs(3600));
        let snap = agg.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.buckets[0], 1);
        assert_eq!(snap.buckets[7], 1);
    }

    #[test]
    fn concurrent_ingest_counts_every_sample() {
        let agg = Arc::new(Aggregator::new(&config(1.15, 192)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let agg = agg.clone();
                thread::spawn(move || {
                    for i in 0..5_000u64 {
                        agg.ingest(Duration::from_micros(1 + (i * 7 + t) % 900));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = agg.snapshot();
        assert_eq!(snap.count, 40_000);
        assert_eq!(snap.buckets.iter().sum::<u64>(), 40_000);
    }

    #[test]
    fn snapshots_taken_during_ingest_never_tear() {
        let agg = Arc::new(Aggregator::new(&config(1.15, 192)));
        let writer = {
            let agg = agg.clone();
            thread::spawn(move || {
                for i in 0..20_000u64 {
                    agg.ingest(Duration::from_nanos(100 + i));
                }
            })
        };
        for _ in 0..200 {
            let snap = agg.snapshot();
            assert_eq!(snap.buckets.iter().sum::<u64>(), snap.count);
        }
        writer.join().unwrap();
    }

    #[test]
    fn merge_rejects_different_layouts() {
        let a = Aggregator::new(&config(1.1, 64));
        let b = Aggregator::new(&config(1.2, 64));
        assert!(matches!(
            a.merge_from(&b),
            Err(MergeError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn merge_from_combines_worker_shards() {
        let a = Aggregator::new(&config(1.15, 128));
        let b = Aggregator::new(&config(1.15, 128));
        a.ingest(Duration::from_millis(1));
        b.ingest(Duration::from_millis(2));
        b.ingest(Duration::from_millis(3));
        a.merge_from(&b).unwrap();

        let snap = a.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.sum(), Duration::from_millis(6));
    }

    #[test]
    fn cumulative_buckets_end_at_count() {
        let agg = Aggregator::new(&config(1.5, 64));
        for us in [5, 5, 80, 900] {
            agg.ingest(Duration::from_micros(us));
        }
        let cumulative = agg.snapshot().cumulative_buckets();
        assert_eq!(cumulative.len(), 3);
        assert_eq!(cumulative.last().map(|(_, c)| *c), Some(4));
        assert!(cumulative.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
