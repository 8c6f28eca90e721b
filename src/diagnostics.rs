use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::clock::Reading;

/// Self-monitoring counters for the instrumentation core.
///
/// None of the events counted here fail the unit of work being measured;
/// they exist so operators can find the faulty clock, layer or sink.
#[derive(Debug, Default)]
pub struct Diagnostics {
    clock_anomalies: AtomicU64,
    structural_repairs: AtomicU64,
    forced_cancellations: AtomicU64,
    usage_errors: AtomicU64,
    export_failures: AtomicU64,
    dropped_exports: AtomicU64,
    exports_sent: AtomicU64,
}

/// Plain copy of [`Diagnostics`] for exposition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub clock_anomalies: u64,
    pub structural_repairs: u64,
    pub forced_cancellations: u64,
    pub usage_errors: u64,
    pub export_failures: u64,
    pub dropped_exports: u64,
    pub exports_sent: u64,
}

impl DiagnosticsSnapshot {
    /// `(name, value)` pairs in a fixed order.
    pub fn entries(&self) -> [(&'static str, u64); 7] {
        [
            ("clock_anomalies", self.clock_anomalies),
            ("structural_repairs", self.structural_repairs),
            ("forced_cancellations", self.forced_cancellations),
            ("usage_errors", self.usage_errors),
            ("export_failures", self.export_failures),
            ("dropped_exports", self.dropped_exports),
            ("exports_sent", self.exports_sent),
        ]
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration from `start` to `end`, clamped to zero (and counted) when
    /// the clock went backwards.
    pub fn elapsed(&self, start: Reading, end: Reading) -> Duration {
        match end.checked_since(start) {
            Some(d) => d,
            None => {
                self.clock_anomalies.fetch_add(1, Ordering::Relaxed);
                warn!(
                    start = start.as_nanos(),
                    end = end.as_nanos(),
                    "clock went backwards; clamping duration to zero"
                );
                Duration::ZERO
            }
        }
    }

    pub fn record_clock_anomaly(&self) {
        self.clock_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_structural_repair(&self, force_closed: u64) {
        self.structural_repairs.fetch_add(1, Ordering::Relaxed);
        self.forced_cancellations
            .fetch_add(force_closed, Ordering::Relaxed);
    }

    pub fn record_forced_cancellations(&self, n: u64) {
        self.forced_cancellations.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_usage_error(&self) {
        self.usage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_failure(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_export(&self) {
        self.dropped_exports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_sent(&self) {
        self.exports_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            clock_anomalies: self.clock_anomalies.load(Ordering::Relaxed),
            structural_repairs: self.structural_repairs.load(Ordering::Relaxed),
            forced_cancellations: self.forced_cancellations.load(Ordering::Relaxed),
            usage_errors: self.usage_errors.load(Ordering::Relaxed),
            export_failures: self.export_failures.load(Ordering::Relaxed),
            dropped_exports: self.dropped_exports.load(Ordering::Relaxed),
            exports_sent: self.exports_sent.load(Ordering::Relaxed),
        }
    }
}
