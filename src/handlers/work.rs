use axum::{
    extract::{Path, Query, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::layers::{self, WorkError, WorkReply, WorkRequest};
use crate::AppState;

use super::AppError;

/// Upper bound on simulated work per request (μs).
const MAX_WORK_US: u64 = 2_000_000;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WorkParams {
    /// Simulated business-method time (μs)
    #[serde(default = "default_work_us")]
    pub work_us: u64,

    /// Force the business method to fail
    #[serde(default)]
    pub fail: bool,
}

fn default_work_us() -> u64 {
    250
}

/// Every response carries the per-layer breakdown so the caller can see
/// where time went without parsing headers.
#[derive(Debug, Serialize)]
pub struct TimedResponse {
    pub data: WorkReply,
    pub spans: Vec<SpanTiming>,
}

#[derive(Debug, Serialize)]
pub struct SpanTiming {
    pub name: String,
    pub duration_us: u64,
    pub outcome: String,
}

// ─── GET /api/work/:op ───────────────────────────────────────────

pub async fn run_work(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    Query(params): Query<WorkParams>,
) -> Result<Response, AppError> {
    if params.work_us > MAX_WORK_US {
        return Err(AppError::BadRequest(format!(
            "work_us must be at most {MAX_WORK_US}"
        )));
    }

    let req = WorkRequest {
        method: "GET",
        route: "/api/work/:op",
        handler: "work",
        op,
        work: Duration::from_micros(params.work_us),
        fail: params.fail,
    };

    // The chain is synchronous and the simulated method sleeps
    let st = state.clone();
    let (result, records) = tokio::task::spawn_blocking(move || {
        layers::perform(&st.chain, st.registry.clone(), st.clock.clone(), req)
    })
    .await
    .map_err(|e| AppError::Internal(format!("unit of work aborted: {e}")))?;

    let reply = match result {
        Ok(reply) => reply,
        Err(WorkError::NotFound(op)) => {
            return Err(AppError::NotFound(format!("operation '{op}' not found")))
        }
        Err(err @ WorkError::Failed(_)) => return Err(AppError::Internal(err.to_string())),
    };

    let header = layers::server_timing(&records);
    let spans = records
        .iter()
        .rev()
        .map(|r| SpanTiming {
            name: r.name.clone(),
            duration_us: r.duration().as_micros() as u64,
            outcome: r.outcome.to_string(),
        })
        .collect();

    let mut response = Json(TimedResponse { data: reply, spans }).into_response();
    if let Ok(val) = HeaderValue::from_str(&header) {
        response.headers_mut().insert("Server-Timing", val);
    }
    Ok(response)
}
