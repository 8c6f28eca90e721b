//! Ordered instrumentation layers.
//!
//! Each layer gets its own span, opened before it runs and closed on every
//! exit path (`ok`, `error`, or `error` followed by a resumed panic). Layers
//! are ordered by an explicit [`LayerRank`], lowest rank outermost, so
//! nesting never depends on registration order.

use std::fmt;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::ChainError;
use crate::labels::LabelSet;
use crate::registry::MetricsRegistry;
use crate::span::{SpanContext, SpanRecord};

/// Position of a layer in the chain. Lower ranks wrap higher ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerRank(pub u16);

impl LayerRank {
    pub const TRANSPORT: Self = Self(100);
    pub const FRAMEWORK: Self = Self(200);
    pub const METHOD: Self = Self(300);
}

impl fmt::Display for LayerRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One instrumentation layer.
///
/// A layer only annotates its own span; it must return the result of
/// `next` (or its own short-circuit result) without altering a failure.
/// `next` is consumed by value, so it runs at most once.
pub trait Interceptor<R, E>: Send + Sync {
    /// Metric name of the span opened around this layer.
    fn metric_name(&self) -> &str;

    /// Labels known before the layer runs.
    fn labels(&self, _cx: &SpanContext) -> LabelSet {
        LabelSet::new()
    }

    /// Labels derived from the result, attached just before the span closes.
    fn annotate(&self, _result: &Result<R, E>, _labels: &mut LabelSet) {}

    fn invoke(&self, cx: &mut SpanContext, next: Next<'_, R, E>) -> Result<R, E> {
        next.run(cx)
    }
}

/// The remainder of the chain below the current layer.
pub struct Next<'a, R, E> {
    layers: &'a [Entry<R, E>],
    terminal: Box<dyn FnOnce(&mut SpanContext) -> Result<R, E> + 'a>,
}

impl<'a, R, E> Next<'a, R, E> {
    /// Runs the next layer, or the wrapped work if this was the innermost.
    pub fn run(self, cx: &mut SpanContext) -> Result<R, E> {
        match self.layers.split_first() {
            Some((entry, rest)) => {
                let next = Next {
                    layers: rest,
                    terminal: self.terminal,
                };
                let layer = entry.layer.as_ref();
                let labels = layer.labels(cx);
                cx.scoped(
                    layer.metric_name(),
                    labels,
                    |cx| layer.invoke(cx, next),
                    |result, extra| layer.annotate(result, extra),
                )
            }
            None => (self.terminal)(cx),
        }
    }

    /// Layers still to run below this point.
    pub fn remaining(&self) -> usize {
        self.layers.len()
    }
}

struct Entry<R, E> {
    rank: LayerRank,
    layer: Arc<dyn Interceptor<R, E>>,
}

impl<R, E> Clone for Entry<R, E> {
    fn clone(&self) -> Self {
        Self {
            rank: self.rank,
            layer: self.layer.clone(),
        }
    }
}

// ─── Chain ───────────────────────────────────────────────────────

pub struct Chain<R, E> {
    layers: Vec<Entry<R, E>>,
}

impl<R, E> Clone for Chain<R, E> {
    fn clone(&self) -> Self {
        Self {
            layers: self.layers.clone(),
        }
    }
}

impl<R, E> Chain<R, E> {
    pub fn builder() -> ChainBuilder<R, E> {
        ChainBuilder { layers: Vec::new() }
    }

    /// `(rank, metric name)` from outermost to innermost.
    pub fn layers(&self) -> Vec<(LayerRank, String)> {
        self.layers
            .iter()
            .map(|e| (e.rank, e.layer.metric_name().to_owned()))
            .collect()
    }

    /// Runs `work` wrapped by every layer, inside an existing unit of work.
    pub fn execute<'a>(
        &'a self,
        cx: &mut SpanContext,
        work: impl FnOnce(&mut SpanContext) -> Result<R, E> + 'a,
    ) -> Result<R, E> {
        Next {
            layers: &self.layers,
            terminal: Box::new(work),
        }
        .run(cx)
    }

    /// Runs `work` as a complete unit of work with a fresh [`SpanContext`],
    /// returning its result and every span record it produced.
    pub fn run_unit<'a>(
        &'a self,
        registry: Arc<MetricsRegistry>,
        clock: Arc<dyn Clock>,
        work: impl FnOnce(&mut SpanContext) -> Result<R, E> + 'a,
    ) -> (Result<R, E>, Vec<SpanRecord>) {
        let mut cx = SpanContext::new(registry, clock);
        let result = self.execute(&mut cx, work);
        (result, cx.finish())
    }
}

pub struct ChainBuilder<R, E> {
    layers: Vec<Entry<R, E>>,
}

impl<R, E> ChainBuilder<R, E> {
    #[must_use]
    pub fn layer(mut self, rank: LayerRank, layer: impl Interceptor<R, E> + 'static) -> Self {
        self.layers.push(Entry {
            rank,
            layer: Arc::new(layer),
        });
        self
    }

    #[must_use]
    pub fn shared_layer(mut self, rank: LayerRank, layer: Arc<dyn Interceptor<R, E>>) -> Self {
        self.layers.push(Entry { rank, layer });
        self
    }

    /// Sorts layers by rank. Two layers with the same rank would have no
    /// defined nesting, so that is rejected.
    pub fn build(mut self) -> Result<Chain<R, E>, ChainError> {
        if self.layers.is_empty() {
            return Err(ChainError::Empty);
        }
        self.layers.sort_by_key(|e| e.rank);
        if let Some(pair) = self.layers.windows(2).find(|w| w[0].rank == w[1].rank) {
            return Err(ChainError::DuplicateRank {
                rank: pair[0].rank.0,
                first: pair[0].layer.metric_name().to_owned(),
                second: pair[1].layer.metric_name().to_owned(),
            });
        }
        Ok(Chain {
            layers: self.layers,
        })
    }
}

// ─── NamedLayer ──────────────────────────────────────────────────

/// A layer that only times: fixed metric name, fixed labels.
#[derive(Debug, Clone)]
pub struct NamedLayer {
    name: String,
    labels: LabelSet,
}

impl NamedLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: LabelSet::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key, value);
        self
    }
}

impl<R, E> Interceptor<R, E> for NamedLayer {
    fn metric_name(&self) -> &str {
        &self.name
    }

    fn labels(&self, _cx: &SpanContext) -> LabelSet {
        self.labels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::span::Outcome;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct Boom(u32);

    struct Gate;

    impl Interceptor<u32, Boom> for Gate {
        fn metric_name(&self) -> &str {
            "gate"
        }

        fn invoke(&self, cx: &mut SpanContext, next: Next<'_, u32, Boom>) -> Result<u32, Boom> {
            // refuse to run with nothing below
            if next.remaining() == 0 {
                return Err(Boom(0));
            }
            next.run(cx)
        }

        fn annotate(&self, result: &Result<u32, Boom>, labels: &mut LabelSet) {
            labels.insert("status", if result.is_ok() { "200" } else { "500" });
        }
    }

    struct Reject;

    impl Interceptor<u32, Boom> for Reject {
        fn metric_name(&self) -> &str {
            "auth"
        }

        fn invoke(&self, _cx: &mut SpanContext, _next: Next<'_, u32, Boom>) -> Result<u32, Boom> {
            Err(Boom(401))
        }
    }

    fn env() -> (Arc<MetricsRegistry>, Arc<ManualClock>) {
        (
            Arc::new(MetricsRegistry::default()),
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn rank_not_registration_order_decides_nesting() {
        let chain = Chain::<u32, Boom>::builder()
            .layer(LayerRank::METHOD, NamedLayer::new("method"))
            .layer(LayerRank::TRANSPORT, Gate)
            .layer(LayerRank::FRAMEWORK, NamedLayer::new("framework"))
            .build()
            .unwrap();
        let names: Vec<_> = chain.layers().into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, ["gate", "framework", "method"]);

        let (registry, clock) = env();
        let (result, records) = chain.run_unit(registry, clock.clone(), |cx| {
            assert_eq!(cx.depth(), 3);
            clock.advance(Duration::from_millis(2));
            Ok(7)
        });
        assert_eq!(result, Ok(7));

        // closing order is innermost first
        let closed: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(closed, ["method", "framework", "gate"]);
        assert_eq!(records[0].parent_id, Some(records[1].id));
        assert_eq!(records[1].parent_id, Some(records[2].id));
        assert_eq!(records[2].labels.get("status"), Some("200"));
        assert!(records.iter().all(|r| r.outcome == Outcome::Ok));
    }

    #[test]
    fn failure_closes_every_span_and_keeps_its_identity() {
        let chain = Chain::<u32, Boom>::builder()
            .layer(LayerRank::TRANSPORT, Gate)
            .layer(LayerRank::METHOD, NamedLayer::new("method"))
            .build()
            .unwrap();
        let (registry, clock) = env();
        let (result, records) = chain.run_unit(registry, clock, |_| Err(Boom(42)));

        assert_eq!(result, Err(Boom(42)));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.outcome == Outcome::Error));
        assert_eq!(records[1].labels.get("status"), Some("500"));
    }

    #[test]
    fn short_circuit_layer_skips_inner_layers() {
        let chain = Chain::<u32, Boom>::builder()
            .layer(LayerRank::TRANSPORT, Gate)
            .layer(LayerRank::FRAMEWORK, Reject)
            .layer(LayerRank::METHOD, NamedLayer::new("method"))
            .build()
            .unwrap();
        let (registry, clock) = env();
        let mut ran = false;
        let (result, records) = chain.run_unit(registry, clock, |_| {
            ran = true;
            Ok(1)
        });

        assert_eq!(result, Err(Boom(401)));
        assert!(!ran);
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["auth", "gate"]);
    }

    #[test]
    fn duplicate_ranks_are_rejected() {
        let err = Chain::<u32, Boom>::builder()
            .layer(LayerRank::FRAMEWORK, NamedLayer::new("a"))
            .layer(LayerRank::FRAMEWORK, NamedLayer::new("b"))
            .build()
            .err();
        assert_eq!(
            err,
            Some(ChainError::DuplicateRank {
                rank: 200,
                first: "a".into(),
                second: "b".into(),
            })
        );
        assert_eq!(
            Chain::<u32, Boom>::builder().build().err(),
            Some(ChainError::Empty)
        );
    }

    #[test]
    fn samples_reach_the_registry_per_layer() {
        let chain = Chain::<u32, Boom>::builder()
            .layer(
                LayerRank::TRANSPORT,
                NamedLayer::new("http").with_label("route", "/orders"),
            )
            .layer(LayerRank::METHOD, NamedLayer::new("orders.load"))
            .build()
            .unwrap();
        let (registry, clock) = env();
        for _ in 0..3 {
            let _ = chain.run_unit(registry.clone(), clock.clone(), |_| Ok(1));
        }
        let snap = registry.snapshot_all();
        assert_eq!(snap.metrics.len(), 2);
        assert!(snap.metrics.values().all(|s| s.count == 3));
    }

    #[test]
    fn shared_layer_can_sit_in_two_chains() {
        let gate: Arc<dyn Interceptor<u32, Boom>> = Arc::new(Gate);
        let alone = Chain::builder()
            .shared_layer(LayerRank::TRANSPORT, gate.clone())
            .build()
            .unwrap();
        let wrapped = Chain::builder()
            .shared_layer(LayerRank::TRANSPORT, gate)
            .layer(LayerRank::METHOD, NamedLayer::new("method"))
            .build()
            .unwrap();

        let (registry, clock) = env();
        let (result, _) = alone.run_unit(registry.clone(), clock.clone(), |_| Ok(1));
        assert_eq!(result, Err(Boom(0)));
        let (result, records) = wrapped.run_unit(registry, clock, |_| Ok(1));
        assert_eq!(result, Ok(1));
        assert_eq!(records.len(), 2);
    }
}
