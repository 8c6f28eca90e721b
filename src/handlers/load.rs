use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    /// Number of concurrent workers, each running units of work back to back
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How long the load runs (seconds)
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Percentage of units whose business method fails (0–100)
    #[serde(default = "default_error_pct")]
    pub error_pct: u8,

    /// Upper bound of the simulated business-method time (μs)
    #[serde(default = "default_max_work_us")]
    pub max_work_us: u64,

    /// Wipe every aggregator before starting
    #[serde(default)]
    pub reset: bool,
}

fn default_concurrency() -> u32 {
    8
}
fn default_duration() -> u64 {
    30
}
fn default_error_pct() -> u8 {
    5
}
fn default_max_work_us() -> u64 {
    5_000
}

#[derive(Debug, Serialize)]
pub struct LoadStatus {
    pub running: bool,
    pub message: String,
}

// ─── POST /api/load/start ────────────────────────────────────────

pub async fn start_load(
    State(state): State<Arc<AppState>>,
    Json(config): Json<LoadConfig>,
) -> Result<Json<LoadStatus>, AppError> {
    if config.concurrency == 0 || config.concurrency > 256 {
        return Err(AppError::BadRequest(
            "concurrency must be between 1 and 256".into(),
        ));
    }
    if config.duration_secs == 0 || config.duration_secs > 300 {
        return Err(AppError::BadRequest(
            "duration_secs must be between 1 and 300".into(),
        ));
    }
    if config.error_pct > 100 {
        return Err(AppError::BadRequest(
            "error_pct must be between 0 and 100".into(),
        ));
    }
    if config.max_work_us == 0 || config.max_work_us > 1_000_000 {
        return Err(AppError::BadRequest(
            "max_work_us must be between 1 and 1000000".into(),
        ));
    }

    // Claim the single load slot; a concurrent start loses here
    if state
        .load_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::AlreadyRunning);
    }

    if config.reset {
        state.registry.reset_all();
    }

    let msg = format!(
        "Started: {} workers × {}s, {}% errors, ≤{}μs per unit",
        config.concurrency, config.duration_secs, config.error_pct, config.max_work_us,
    );

    let st = state.clone();
    let handle = tokio::spawn(async move {
        crate::load_generator::run(st, config).await;
    });

    let mut guard = state.load_handle.lock().await;
    *guard = Some(handle);

    Ok(Json(LoadStatus {
        running: true,
        message: msg,
    }))
}

// ─── POST /api/load/stop ─────────────────────────────────────────

pub async fn stop_load(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LoadStatus>, AppError> {
    if !state.load_running.load(Ordering::SeqCst) {
        return Ok(Json(LoadStatus {
            running: false,
            message: "No load is running".into(),
        }));
    }

    // Signal all workers to stop
    state.load_running.store(false, Ordering::SeqCst);

    let mut guard = state.load_handle.lock().await;
    if let Some(handle) = guard.take() {
        // Ignore JoinError: the task may have already finished
        let _ = handle.await;
    }

    Ok(Json(LoadStatus {
        running: false,
        message: "Load stopped".into(),
    }))
}

// ─── GET /api/load/status ────────────────────────────────────────

pub async fn load_status(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    let running = state.load_running.load(Ordering::SeqCst);
    Json(LoadStatus {
        running,
        message: if running {
            "Load in progress".into()
        } else {
            "Idle".into()
        },
    })
}
