//! Versioned exposition of a [`RegistrySnapshot`].
//!
//! Text, version 1:
//!
//! ```text
//! # latency-exposition v1
//! # generated_at 2026-10-18T09:30:00Z
//! http{outcome="ok",route="/orders"} count=3 sum_ns=4500000 p50_ns=1520000 p90_ns=1750000 p99_ns=1750000
//! http_bucket{outcome="ok",route="/orders",le="1520000"} 2
//! # diagnostics clock_anomalies=0 structural_repairs=0 ...
//! ```
//!
//! Bucket lines appear only when requested, and only for non-empty
//! buckets; `le` is the bucket's upper bound in nanoseconds and the value
//! is cumulative. Quantiles are bucket upper bounds (over-estimates).

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::aggregator::PercentileSet;
use crate::config::ExpositionFormat;
use crate::diagnostics::DiagnosticsSnapshot;
use crate::labels::{escape_label_value, sanitize_name, LabelSet, MetricKey};
use crate::registry::RegistrySnapshot;

pub const EXPOSITION_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpositionOptions {
    pub format: ExpositionFormat,
    pub include_buckets: bool,
}

impl ExpositionOptions {
    pub fn content_type(&self) -> &'static str {
        match self.format {
            ExpositionFormat::Text => "text/plain; version=1; charset=utf-8",
            ExpositionFormat::Json => "application/json",
        }
    }
}

pub fn encode(
    snapshot: &RegistrySnapshot,
    options: &ExpositionOptions,
    generated_at: DateTime<Utc>,
) -> String {
    match options.format {
        ExpositionFormat::Text => encode_text(snapshot, options.include_buckets, generated_at),
        ExpositionFormat::Json => encode_json(snapshot, options.include_buckets, generated_at),
    }
}

// ─── Text ────────────────────────────────────────────────────────

fn encode_text(
    snapshot: &RegistrySnapshot,
    include_buckets: bool,
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::with_capacity(128 + snapshot.metrics.len() * 160);
    let _ = writeln!(out, "# latency-exposition v{EXPOSITION_VERSION}");
    let _ = writeln!(
        out,
        "# generated_at {}",
        generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );

    for (key, snap) in &snapshot.metrics {
        let set = PercentileSet::from_snapshot(snap);
        let _ = writeln!(
            out,
            "{key} count={} sum_ns={} p50_ns={} p90_ns={} p99_ns={}",
            set.count, set.sum_ns, set.p50_ns, set.p90_ns, set.p99_ns
        );
        if include_buckets {
            for (upper, cumulative) in snap.cumulative_buckets() {
                let _ = writeln!(
                    out,
                    "{}_bucket{} {cumulative}",
                    sanitize_name(&key.name),
                    labels_with_le(&key.labels, upper)
                );
            }
        }
    }

    out.push_str("# diagnostics");
    for (name, value) in snapshot.diagnostics.entries() {
        let _ = write!(out, " {name}={value}");
    }
    out.push('\n');
    out
}

fn labels_with_le(labels: &LabelSet, upper: u64) -> String {
    let mut out = String::from("{");
    for (k, v) in labels.iter() {
        let _ = write!(out, "{}=\"{}\",", sanitize_name(k), escape_label_value(v));
    }
    let _ = write!(out, "le=\"{upper}\"}}");
    out
}

// ─── JSON ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonExposition<'a> {
    version: u32,
    generated_at: DateTime<Utc>,
    metrics: Vec<JsonMetric<'a>>,
    diagnostics: DiagnosticsSnapshot,
}

#[derive(Serialize)]
struct JsonMetric<'a> {
    name: &'a str,
    labels: &'a LabelSet,
    summary: PercentileSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    buckets: Option<Vec<JsonBucket>>,
}

#[derive(Serialize)]
struct JsonBucket {
    le_ns: u64,
    cumulative: u64,
}

fn encode_json(
    snapshot: &RegistrySnapshot,
    include_buckets: bool,
    generated_at: DateTime<Utc>,
) -> String {
    let metrics = snapshot
        .metrics
        .iter()
        .map(|(MetricKey { name, labels }, snap)| JsonMetric {
            name,
            labels,
            summary: PercentileSet::from_snapshot(snap),
            buckets: include_buckets.then(|| {
                snap.cumulative_buckets()
                    .into_iter()
                    .map(|(le_ns, cumulative)| JsonBucket { le_ns, cumulative })
                    .collect()
            }),
        })
        .collect();

    let doc = JsonExposition {
        version: EXPOSITION_VERSION,
        generated_at,
        metrics,
        diagnostics: snapshot.diagnostics,
    };
    serde_json::to_string(&doc).unwrap_or_default()
}
