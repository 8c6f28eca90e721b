//! Process-wide owner of every [`Aggregator`].
//!
//! The registry is plain state handed around as `Arc<MetricsRegistry>`;
//! tests build their own isolated instances. Aggregators are created lazily
//! on the first sample for a key and live until an explicit `reset`.
//!
//! Reads go through an [`ArcSwap`] of the whole key space, so recording a
//! sample for a known key takes no registry lock and allocates nothing.
//! Creating or removing a key copies the map under a mutation lock and
//! swaps the new version in.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::aggregator::{Aggregator, AggregatorSnapshot};
use crate::config::{AggregatorConfig, ObservatoryConfig};
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::labels::{KeyPolicy, LabelSet, MetricKey};
use crate::span::TimerSample;

/// metric name → label set → aggregator
type Families = HashMap<String, HashMap<LabelSet, Arc<Aggregator>>>;

pub struct MetricsRegistry {
    defaults: AggregatorConfig,
    key_policy: KeyPolicy,
    metrics: ArcSwap<Families>,
    mutation: Mutex<()>,
    diagnostics: Arc<Diagnostics>,
}

/// Registry-wide point-in-time view, ordered by key.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub metrics: BTreeMap<MetricKey, AggregatorSnapshot>,
    pub diagnostics: DiagnosticsSnapshot,
}

impl MetricsRegistry {
    /// Invalid aggregator defaults are replaced by the built-in ones.
    pub fn new(config: &ObservatoryConfig) -> Self {
        Self {
            defaults: config.aggregator.or_default(),
            key_policy: config.key_policy,
            metrics: ArcSwap::from_pointee(Families::new()),
            mutation: Mutex::new(()),
            diagnostics: Arc::new(Diagnostics::new()),
        }
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn key_policy(&self) -> KeyPolicy {
        self.key_policy
    }

    pub fn default_config(&self) -> &AggregatorConfig {
        &self.defaults
    }

    /// Returns the aggregator for `key`, creating it with `config` if the
    /// key is new. Racing first-touch callers all receive the same instance.
    /// An existing aggregator keeps the configuration it was created with.
    pub fn get_or_create(&self, key: &MetricKey, config: &AggregatorConfig) -> Arc<Aggregator> {
        self.lookup(&key.name, &key.labels)
            .unwrap_or_else(|| self.insert(&key.name, &key.labels, config))
    }

    pub fn get(&self, key: &MetricKey) -> Option<Arc<Aggregator>> {
        self.lookup(&key.name, &key.labels)
    }

    /// Routes one sample to its aggregator, keyed per the key policy.
    pub fn record(&self, sample: &TimerSample) {
        let labels = self.key_policy.key_labels(&sample.labels);
        let agg = self
            .lookup(&sample.metric_name, &labels)
            .unwrap_or_else(|| self.insert(&sample.metric_name, &labels, &self.defaults));
        agg.ingest(sample.duration);
    }

    pub fn snapshot_all(&self) -> RegistrySnapshot {
        // pin one version of the key space; aggregators are read lock-free of it
        let families = self.metrics.load_full();
        let metrics = families
            .iter()
            .flat_map(|(name, series)| {
                series.iter().map(move |(labels, agg)| {
                    (MetricKey::new(name.as_str(), labels.clone()), agg.snapshot())
                })
            })
            .collect();

        RegistrySnapshot {
            metrics,
            diagnostics: self.diagnostics.snapshot(),
        }
    }

    /// Administrative removal. Returns whether the key existed; removing an
    /// unknown key is a harmless no-op. Holders of the old `Arc` keep a
    /// detached aggregator; the next sample creates a fresh one.
    pub fn reset(&self, key: &MetricKey) -> bool {
        let _guard = self.mutation.lock();
        if self.lookup(&key.name, &key.labels).is_none() {
            return false;
        }

        let mut next = Families::clone(&self.metrics.load());
        if let Some(series) = next.get_mut(&key.name) {
            series.remove(&key.labels);
            if series.is_empty() {
                next.remove(&key.name);
            }
        }
        self.metrics.store(Arc::new(next));
        debug!(metric = %key, "aggregator reset");
        true
    }

    pub fn reset_all(&self) {
        let _guard = self.mutation.lock();
        self.metrics.store(Arc::new(Families::new()));
    }

    pub fn keys(&self) -> Vec<MetricKey> {
        let mut keys: Vec<_> = self
            .metrics
            .load()
            .iter()
            .flat_map(|(name, series)| {
                series
                    .keys()
                    .map(move |labels| MetricKey::new(name.as_str(), labels.clone()))
            })
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.metrics.load().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, name: &str, labels: &LabelSet) -> Option<Arc<Aggregator>> {
        self.metrics.load().get(name)?.get(labels).cloned()
    }

    /// Slow path for a key not seen before.
    fn insert(&self, name: &str, labels: &LabelSet, config: &AggregatorConfig) -> Arc<Aggregator> {
        let _guard = self.mutation.lock();
        // another caller may have created it while we waited
        if let Some(agg) = self.lookup(name, labels) {
            return agg;
        }

        let agg = Arc::new(Aggregator::new(config));
        let mut next = Families::clone(&self.metrics.load());
        next.entry(name.to_owned())
            .or_default()
            .insert(labels.clone(), agg.clone());
        self.metrics.store(Arc::new(next));
        debug!(metric = %name, ?labels, "creating aggregator");
        agg
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(&ObservatoryConfig::default())
    }
}
