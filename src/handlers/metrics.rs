use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use latency_observatory::{DiagnosticsSnapshot, PercentileSet};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::AppState;

/// One row on the dashboard: a metric key and its percentile summary.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRow {
    pub key: String,
    pub summary: PercentileSet,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub metrics: Vec<MetricRow>,
    pub diagnostics: DiagnosticsSnapshot,
    pub load_running: bool,
}

fn dashboard(state: &AppState) -> DashboardSnapshot {
    let snap = state.registry.snapshot_all();
    DashboardSnapshot {
        metrics: snap
            .metrics
            .iter()
            .map(|(key, agg)| MetricRow {
                key: key.to_string(),
                summary: PercentileSet::from_snapshot(agg),
            })
            .collect(),
        diagnostics: snap.diagnostics,
        load_running: state
            .load_running
            .load(std::sync::atomic::Ordering::Relaxed),
    }
}

// ─── GET /metrics ────────────────────────────────────────────────
/// Scrape endpoint: the versioned exposition from the pull exporter.

pub async fn scrape(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, state.pull.content_type())],
        state.pull.render(),
    )
}

// ─── GET /api/metrics ────────────────────────────────────────────
/// Returns a single JSON snapshot, handy for curl.

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
) -> Json<DashboardSnapshot> {
    Json(dashboard(&state))
}

// ─── GET /api/metrics/stream ─────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a `DashboardSnapshot` as JSON every 500 ms.

pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).map(move |_| {
        let json = serde_json::to_string(&dashboard(&state)).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
