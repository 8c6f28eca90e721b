use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::handlers::load::LoadConfig;
use crate::layers::{self, WorkRequest, OPERATIONS};
use crate::AppState;

// ─── Public entry point ──────────────────────────────────────────

/// Runs `concurrency` blocking workers, each pushing units of work through
/// the chain until the deadline or until `load_running` is cleared.
pub async fn run(state: Arc<AppState>, config: LoadConfig) {
    let deadline = Instant::now() + Duration::from_secs(config.duration_secs);
    let started = Instant::now();

    let mut handles = Vec::with_capacity(config.concurrency as usize);
    for worker_id in 0..config.concurrency {
        let state = state.clone();
        let config = config.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            worker(worker_id, &state, &config, deadline)
        }));
    }

    let mut units = 0u64;
    for h in handles {
        units += h.await.unwrap_or(0);
    }

    state.load_running.store(false, Ordering::SeqCst);
    info!(
        units,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "load run finished"
    );
}

// ─── Worker loop ─────────────────────────────────────────────────

/// Returns how many units of work this worker completed.
fn worker(id: u32, state: &AppState, config: &LoadConfig, deadline: Instant) -> u64 {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    let mut units = 0u64;

    while state.load_running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let op = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
        let req = WorkRequest {
            method: "GET",
            route: "/api/work/:op",
            handler: "load",
            op: op.to_owned(),
            work: Duration::from_micros(rng.gen_range(1..=config.max_work_us)),
            fail: rng.gen_range(0u8..100) < config.error_pct,
        };

        let _ = layers::perform(
            &state.chain,
            state.registry.clone(),
            state.clock.clone(),
            req,
        );
        units += 1;
    }
    units
}
