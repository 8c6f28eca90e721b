use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use latency_observatory::{
    Clock, ExpositionOptions, FileTransport, MetricsRegistry, MonotonicClock, ObservatoryConfig,
    PullExporter, PushExporter,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod handlers;
mod layers;
mod load_generator;
mod server;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Process-wide aggregators; every unit of work records into it.
    pub registry: Arc<MetricsRegistry>,

    /// Monotonic source shared by all span contexts.
    pub clock: Arc<dyn Clock>,

    /// transport → framework → method instrumentation layers.
    pub chain: layers::WorkChain,

    /// Renders the scrape exposition.
    pub pull: PullExporter,

    /// Flag checked by every load-generator worker on each iteration.
    pub load_running: Arc<AtomicBool>,

    /// Handle to the spawned load-generator task so we can await clean shutdown.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("latency_observatory=info")),
        )
        .init();

    // ── 1. Load configuration ────────────────────────────────────
    let config = match std::env::var("OBSERVATORY_CONFIG") {
        Ok(path) => ObservatoryConfig::load(&path)
            .unwrap_or_else(|e| panic!("invalid configuration in {path}: {e}")),
        Err(_) => ObservatoryConfig::default(),
    };
    info!(
        base = config.aggregator.base,
        buckets = config.aggregator.bucket_count,
        shards = config.aggregator.shards,
        key_policy = ?config.key_policy,
        "configuration loaded"
    );

    // ── 2. Build shared state ────────────────────────────────────
    let registry = Arc::new(MetricsRegistry::new(&config));
    let pull = PullExporter::new(
        registry.clone(),
        ExpositionOptions {
            format: config.export.format,
            include_buckets: config.export.include_buckets,
        },
    );
    let state = Arc::new(AppState {
        registry: registry.clone(),
        clock: Arc::new(MonotonicClock::new()),
        chain: layers::build_chain().expect("instrumentation layers have distinct ranks"),
        pull,
        load_running: Arc::new(AtomicBool::new(false)),
        load_handle: tokio::sync::Mutex::new(None),
    });

    // ── 3. Optional push exporter ────────────────────────────────
    let push = match std::env::var("OBSERVATORY_PUSH_FILE") {
        Ok(path) => {
            info!(%path, interval_ms = config.export.interval_ms, "pushing expositions to file");
            let exporter = PushExporter::new(
                registry.clone(),
                FileTransport::new(path),
                config.export.clone(),
            );
            Some(Arc::new(exporter).spawn())
        }
        Err(_) => None,
    };

    // ── 4. Build Axum router ─────────────────────────────────────
    let app = server::create_router(state);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let addr = std::env::var("OBSERVATORY_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));

    info!(%addr, "latency observatory listening");
    info!("scrape      → GET  /metrics");
    info!("metrics     → GET  /api/metrics  (SSE: /api/metrics/stream)");
    info!("work        → GET  /api/work/:op?work_us=250&fail=false");
    info!("load        → POST /api/load/start");

    if let Err(e) = axum::serve(listener, app).await {
        warn!(error = %e, "server exited with error");
    }

    if let Some(handle) = push {
        handle.shutdown().await;
    }
}
