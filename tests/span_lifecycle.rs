use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use latency_observatory::{
    LabelSet, ManualClock, MetricKey, MetricsRegistry, ObservatoryConfig, Outcome, SpanContext,
    SpanError,
};
use proptest::prelude::*;

fn context() -> (Arc<MetricsRegistry>, Arc<ManualClock>, SpanContext) {
    let registry = Arc::new(MetricsRegistry::default());
    let clock = Arc::new(ManualClock::starting_at(1));
    let cx = SpanContext::new(registry.clone(), clock.clone());
    (registry, clock, cx)
}

#[derive(Debug, Clone)]
enum Step {
    Open(u16),
    CloseTop(u16),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            (1u16..500).prop_map(Step::Open),
            (1u16..500).prop_map(Step::CloseTop),
        ],
        0..64,
    )
}

proptest! {
    #[test]
    fn well_nested_spans_close_exactly_once(steps in steps()) {
        let (registry, clock, mut cx) = context();
        let mut stack = Vec::new();
        let mut opened = 0usize;

        for step in &steps {
            match *step {
                Step::Open(advance) => {
                    clock.advance(Duration::from_micros(u64::from(advance)));
                    stack.push(cx.open("op", LabelSet::new()).unwrap());
                    opened += 1;
                }
                Step::CloseTop(advance) => {
                    clock.advance(Duration::from_micros(u64::from(advance)));
                    if let Some(handle) = stack.pop() {
                        let report = cx.close(handle, Outcome::Ok).unwrap();
                        prop_assert!(!report.was_repaired());
                    }
                }
            }
        }
        let still_open = stack.len();
        let records = cx.finish();

        prop_assert_eq!(records.len(), opened);
        let by_id: HashMap<_, _> = records.iter().map(|r| (r.id, r)).collect();
        prop_assert_eq!(by_id.len(), opened);

        for record in &records {
            prop_assert!(record.end >= record.start);
            if let Some(parent) = record.parent_id.and_then(|p| by_id.get(&p)) {
                prop_assert!(parent.start <= record.start);
                prop_assert!(record.end <= parent.end);
            }
        }
        let cancelled = records.iter().filter(|r| r.outcome == Outcome::Cancelled).count();
        prop_assert_eq!(cancelled, still_open);
        prop_assert_eq!(registry.diagnostics().snapshot().structural_repairs, 0);
    }
}

#[test]
fn cancelling_a_unit_of_work_cancels_all_three_layers() {
    let (registry, clock, mut cx) = context();
    cx.open("outer", LabelSet::new()).unwrap();
    clock.advance(Duration::from_millis(1));
    cx.open("middle", LabelSet::new()).unwrap();
    clock.advance(Duration::from_millis(1));
    cx.open("inner", LabelSet::new()).unwrap();
    clock.advance(Duration::from_millis(1));

    // the unit of work is abandoned mid-flight
    let records = cx.finish();

    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.outcome == Outcome::Cancelled));
    for name in ["outer", "middle", "inner"] {
        let key = MetricKey::new(name, LabelSet::new().with("outcome", "cancelled"));
        assert_eq!(registry.snapshot_all().metrics[&key].count, 1, "{name}");
    }
    assert_eq!(registry.diagnostics().snapshot().forced_cancellations, 3);
}

#[tokio::test]
async fn dropping_an_async_task_cancels_its_spans() {
    let registry = Arc::new(MetricsRegistry::default());
    let clock = Arc::new(ManualClock::new());

    let (opened_tx, opened_rx) = tokio::sync::oneshot::channel();
    let task = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut cx = SpanContext::new(registry, clock);
            cx.open("request", LabelSet::new()).unwrap();
            cx.open("handler", LabelSet::new()).unwrap();
            let _ = opened_tx.send(());
            std::future::pending::<()>().await;
        })
    };
    opened_rx.await.unwrap();
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let snap = registry.snapshot_all();
    let cancelled = LabelSet::new().with("outcome", "cancelled");
    assert_eq!(snap.metrics[&MetricKey::new("request", cancelled.clone())].count, 1);
    assert_eq!(snap.metrics[&MetricKey::new("handler", cancelled)].count, 1);
}

#[test]
fn middle_closing_before_inner_is_repaired() {
    let (registry, clock, mut cx) = context();
    let outer = cx.open("transport", LabelSet::new()).unwrap();
    let middle = cx.open("framework", LabelSet::new()).unwrap();
    let inner = cx.open("method", LabelSet::new()).unwrap();
    clock.advance(Duration::from_millis(4));

    let report = cx.close(middle, Outcome::Ok).unwrap();
    assert_eq!(report.force_closed, vec![inner.id()]);
    assert_eq!(report.record.name, "framework");
    assert_eq!(report.record.outcome, Outcome::Ok);
    assert_eq!(report.record.duration(), Duration::from_millis(4));

    assert_eq!(
        cx.close(inner, Outcome::Ok),
        Err(SpanError::NotOpen { span: inner.id() })
    );
    cx.close(outer, Outcome::Ok).unwrap();

    let records = cx.finish();
    let inner_rec = records.iter().find(|r| r.name == "method").unwrap();
    assert_eq!(inner_rec.outcome, Outcome::Cancelled);
    assert!(records
        .iter()
        .filter(|r| r.name != "method")
        .all(|r| r.outcome == Outcome::Ok));

    let diag = registry.diagnostics().snapshot();
    assert_eq!(diag.structural_repairs, 1);
    assert_eq!(diag.usage_errors, 1);
}

#[test]
fn opening_after_teardown_is_a_usage_error() {
    let (registry, _, mut cx) = context();
    cx.teardown();
    assert!(matches!(
        cx.open("late", LabelSet::new()),
        Err(SpanError::ContextClosed { .. })
    ));
    assert_eq!(registry.diagnostics().snapshot().usage_errors, 1);
}

#[test]
fn clock_stepping_back_between_closes_keeps_parents_last() {
    let (registry, clock, mut cx) = context();
    clock.set(1_000);
    let parent = cx.open("parent", LabelSet::new()).unwrap();
    let child = cx.open("child", LabelSet::new()).unwrap();
    clock.set(5_000);
    cx.close(child, Outcome::Ok).unwrap();
    clock.set(2_000);
    cx.close(parent, Outcome::Ok).unwrap();

    let records = cx.finish();
    let (child, parent) = (&records[0], &records[1]);
    assert!(child.end <= parent.end);
    assert!(parent.start <= child.start);
    assert_eq!(registry.diagnostics().snapshot().clock_anomalies, 1);
}

#[test]
fn zero_bucket_config_does_not_break_the_unit_of_work() {
    let mut config = ObservatoryConfig::default();
    config.aggregator.bucket_count = 0;
    let registry = Arc::new(MetricsRegistry::new(&config));
    let mut cx = SpanContext::new(registry.clone(), Arc::new(ManualClock::new()));

    let h = cx.open("checkout", LabelSet::new()).unwrap();
    let report = cx.close(h, Outcome::Ok).unwrap();
    assert_eq!(report.record.outcome, Outcome::Ok);

    let key = MetricKey::new("checkout", LabelSet::new().with("outcome", "ok"));
    assert_eq!(registry.snapshot_all().metrics[&key].count, 1);
}
