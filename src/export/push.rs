use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::exposition::{encode, ExpositionOptions};
use crate::config::ExportConfig;
use crate::error::TransportError;
use crate::registry::MetricsRegistry;

// ─── Transport ───────────────────────────────────────────────────

/// One encoded registry snapshot on its way to a sink.
#[derive(Debug, Clone)]
pub struct ExportBatch {
    pub sequence: u64,
    pub generated_at: DateTime<Utc>,
    pub content_type: &'static str,
    pub payload: String,
}

/// Destination for pushed batches.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, batch: &ExportBatch) -> Result<(), TransportError>;
}

/// Appends every batch to a file, one after another.
#[derive(Debug, Clone)]
pub struct FileTransport {
    path: PathBuf,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn send(&self, batch: &ExportBatch) -> Result<(), TransportError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(batch.payload.as_bytes()).await?;
        if !batch.payload.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        file.flush().await?;
        Ok(())
    }
}

// ─── PushExporter ────────────────────────────────────────────────

/// What happened to one export cycle's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Sent { sequence: u64, attempts: u32 },
    Dropped { sequence: u64, attempts: u32 },
}

/// Periodically snapshots the registry and pushes it through a
/// [`Transport`]. Failed or timed-out sends are retried with doubling
/// backoff up to `retry_attempts` total attempts; then the batch is dropped
/// and counted.
/// Nothing here ever reaches request-handling code.
pub struct PushExporter<T: Transport> {
    registry: Arc<MetricsRegistry>,
    transport: T,
    config: ExportConfig,
    options: ExpositionOptions,
    sequence: AtomicU64,
    dropped: AtomicU64,
}

impl<T: Transport> PushExporter<T> {
    /// `config` is expected to be validated already.
    pub fn new(registry: Arc<MetricsRegistry>, transport: T, config: ExportConfig) -> Self {
        let options = ExpositionOptions {
            format: config.format,
            include_buckets: config.include_buckets,
        };
        Self {
            registry,
            transport,
            config,
            options,
            sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Batches this exporter has given up on.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Runs one export cycle: snapshot, encode, send with retries.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let generated_at = Utc::now();
        let batch = ExportBatch {
            sequence,
            generated_at,
            content_type: self.options.content_type(),
            payload: encode(&self.registry.snapshot_all(), &self.options, generated_at),
        };
        let diagnostics = self.registry.diagnostics();

        let max_attempts = self.config.retry_attempts.max(1);
        for attempt in 1..=max_attempts {
            let timeout = self.config.send_timeout();
            let sent = match tokio::time::timeout(timeout, self.transport.send(&batch)).await {
                Ok(sent) => sent,
                Err(_) => Err(TransportError::TimedOut {
                    sequence,
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            match sent {
                Ok(()) => {
                    diagnostics.record_export_sent();
                    debug!(sequence, attempt, "export batch sent");
                    return CycleOutcome::Sent {
                        sequence,
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    diagnostics.record_export_failure();
                    warn!(sequence, attempt, max_attempts, %err, "export attempt failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.backoff_for(attempt)).await;
                    }
                }
            }
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
        diagnostics.record_dropped_export();
        warn!(sequence, attempts = max_attempts, "export batch dropped");
        CycleOutcome::Dropped {
            sequence,
            attempts: max_attempts,
        }
    }

    /// Starts the timer-driven loop on the tokio runtime. The first push
    /// happens one interval after start; overrun ticks are skipped rather
    /// than bunched up.
    pub fn spawn(self: Arc<Self>) -> PushHandle {
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();
        let interval = self.config.interval();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            info!(interval_ms = interval.as_millis() as u64, "push exporter started");
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                }
            }
            info!("push exporter stopped");
        });

        PushHandle { shutdown, join }
    }
}

/// Stops a spawned [`PushExporter`] loop.
pub struct PushHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl PushHandle {
    /// Signals the loop and waits for it; an in-flight cycle completes first.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        // JoinError only if the runtime aborted the task
        let _ = self.join.await;
    }
}
