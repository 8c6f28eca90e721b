use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hdrhistogram::Histogram;
use latency_observatory::{Aggregator, AggregatorConfig, AggregatorSnapshot};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn aggregator() -> Aggregator {
    Aggregator::new(&AggregatorConfig::default())
}

fn fill(values: &[u64]) -> AggregatorSnapshot {
    let agg = aggregator();
    for &v in values {
        agg.ingest(Duration::from_nanos(v));
    }
    agg.snapshot()
}

/// Rank-`ceil(q * n)` element of the sorted input.
fn exact_quantile(sorted: &[u64], q: f64) -> u64 {
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

fn durations() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1_000u64..10_000_000_000, 1..400)
}

proptest! {
    #[test]
    fn quantile_overestimates_within_one_bucket(mut values in durations(), q in 0.0f64..=1.0) {
        let snap = fill(&values);
        values.sort_unstable();
        let truth = exact_quantile(&values, q) as f64;
        let base = AggregatorConfig::default().base;

        let est = snap.quantile(q).unwrap().as_nanos() as f64;
        prop_assert!(est >= truth, "est {est} < truth {truth}");
        // +1 ns for rounding the boundary up to whole nanoseconds
        prop_assert!(est - truth <= truth * (base - 1.0) + 1.0, "est {est} truth {truth}");
    }

    #[test]
    fn merge_is_associative_and_commutative(
        a in durations(),
        b in durations(),
        c in durations(),
    ) {
        let (sa, sb, sc) = (fill(&a), fill(&b), fill(&c));

        let mut left = sa.clone();
        left.merge(&sb).unwrap();
        left.merge(&sc).unwrap();

        let mut bc = sb.clone();
        bc.merge(&sc).unwrap();
        let mut right = sa.clone();
        right.merge(&bc).unwrap();

        let mut shuffled = sc.clone();
        shuffled.merge(&sa).unwrap();
        shuffled.merge(&sb).unwrap();

        prop_assert_eq!(&left, &right);
        prop_assert_eq!(&left, &shuffled);

        let everything: Vec<u64> = a.iter().chain(&b).chain(&c).copied().collect();
        prop_assert_eq!(left, fill(&everything));
    }
}

#[test]
fn agrees_with_hdrhistogram_on_a_skewed_workload() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let agg = aggregator();
    let mut reference = Histogram::<u64>::new_with_bounds(1, 60_000_000_000, 3).unwrap();

    for _ in 0..20_000 {
        // mostly fast, with a long tail
        let base_us: f64 = rng.gen_range(100.0..2_000.0);
        let tail = if rng.gen_bool(0.02) { rng.gen_range(10.0..200.0) } else { 1.0 };
        let nanos = (base_us * tail * 1_000.0) as u64;
        agg.ingest(Duration::from_nanos(nanos));
        reference.record(nanos).unwrap();
    }

    let snap = agg.snapshot();
    let base = AggregatorConfig::default().base;
    assert_eq!(snap.count, reference.len());
    for q in [0.5, 0.9, 0.99, 0.999] {
        let ours = snap.quantile(q).unwrap().as_nanos() as f64;
        let theirs = reference.value_at_quantile(q) as f64;
        let ratio = ours / theirs;
        assert!(
            (0.99..=base * 1.01).contains(&ratio),
            "q={q}: ours={ours} hdr={theirs}"
        );
    }
}

#[test]
fn concurrent_ingest_keeps_every_sample() {
    const THREADS: u64 = 16;
    const PER_THREAD: u64 = 10_000;

    let agg = Arc::new(aggregator());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let agg = agg.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    agg.ingest(Duration::from_nanos(1_000 + t * PER_THREAD + i));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snap = agg.snapshot();
    let n = THREADS * PER_THREAD;
    assert_eq!(snap.count, n);
    assert_eq!(snap.buckets.iter().sum::<u64>(), n);
    // 1000 + (1000 + n - 1) over n values
    assert_eq!(snap.sum_ns, n * 1_000 + n * (n - 1) / 2);
}

#[test]
fn values_past_the_top_bucket_report_its_upper_bound() {
    let agg = aggregator();
    agg.ingest(Duration::from_secs(60 * 60 * 24 * 365));
    let snap = agg.snapshot();
    let top = snap.layout().len() - 1;
    assert_eq!(snap.buckets[top], 1);
    assert_eq!(
        snap.quantile(1.0).unwrap().as_nanos() as u64,
        snap.layout().upper_bound(top).ceil() as u64
    );
}
