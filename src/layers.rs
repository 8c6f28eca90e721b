use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use latency_observatory::{
    Chain, ChainError, Clock, Interceptor, LabelSet, LayerRank, MetricsRegistry, SpanContext,
    SpanRecord,
};

// ─── Request / result types ──────────────────────────────────────

/// Baggage keys the HTTP glue sets on each unit of work.
pub const METHOD: &str = "method";
pub const ROUTE: &str = "route";
pub const HANDLER: &str = "handler";
pub const OPERATION: &str = "op";

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkReply {
    pub op: String,
    pub checksum: u64,
}

#[derive(Debug, Clone)]
pub enum WorkError {
    NotFound(String),
    Failed(String),
}

impl WorkError {
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Failed(_) => 500,
        }
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(op) => write!(f, "unknown operation '{op}'"),
            Self::Failed(msg) => write!(f, "operation failed: {msg}"),
        }
    }
}

pub type WorkChain = Chain<WorkReply, WorkError>;

// ─── Layers ──────────────────────────────────────────────────────

/// Outermost layer: what the HTTP server saw.
pub struct TransportLayer;

impl Interceptor<WorkReply, WorkError> for TransportLayer {
    fn metric_name(&self) -> &str {
        "http.server"
    }

    fn labels(&self, cx: &SpanContext) -> LabelSet {
        copy_baggage(cx, &[METHOD, ROUTE])
    }

    fn annotate(&self, result: &Result<WorkReply, WorkError>, labels: &mut LabelSet) {
        let status = match result {
            Ok(_) => 200,
            Err(e) => e.status(),
        };
        labels.insert("status", status.to_string());
    }
}

/// Middle layer: handler dispatch.
pub struct FrameworkLayer;

impl Interceptor<WorkReply, WorkError> for FrameworkLayer {
    fn metric_name(&self) -> &str {
        "framework.dispatch"
    }

    fn labels(&self, cx: &SpanContext) -> LabelSet {
        copy_baggage(cx, &[HANDLER])
    }
}

/// Innermost layer: the business method. Only operations registered up
/// front get their own label value; the rest share `unregistered`.
pub struct MethodLayer {
    instrumented: BTreeSet<String>,
}

impl MethodLayer {
    pub fn new<I, S>(ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            instrumented: ops.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_registered(&self, op: &str) -> bool {
        self.instrumented.contains(op)
    }
}

impl Interceptor<WorkReply, WorkError> for MethodLayer {
    fn metric_name(&self) -> &str {
        "method.invoke"
    }

    fn labels(&self, cx: &SpanContext) -> LabelSet {
        let op = cx
            .baggage()
            .get(OPERATION)
            .filter(|op| self.is_registered(op))
            .unwrap_or("unregistered");
        LabelSet::new().with(OPERATION, op)
    }
}

/// Operations the demo knows how to run.
pub const OPERATIONS: &[&str] = &["orders.load", "orders.create", "users.lookup", "report.render"];

pub fn build_chain() -> Result<WorkChain, ChainError> {
    Chain::builder()
        .layer(LayerRank::METHOD, MethodLayer::new(OPERATIONS.iter().copied()))
        .layer(LayerRank::FRAMEWORK, FrameworkLayer)
        .layer(LayerRank::TRANSPORT, TransportLayer)
        .build()
}

// ─── Unit of work ────────────────────────────────────────────────

/// One simulated request, as the HTTP glue or the load generator sees it.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub method: &'static str,
    pub route: &'static str,
    pub handler: &'static str,
    pub op: String,
    pub work: Duration,
    pub fail: bool,
}

/// Runs `req` as one unit of work through `chain`. Blocking: the simulated
/// business method sleeps, so async callers go through `spawn_blocking`.
pub fn perform(
    chain: &WorkChain,
    registry: Arc<MetricsRegistry>,
    clock: Arc<dyn Clock>,
    req: WorkRequest,
) -> (Result<WorkReply, WorkError>, Vec<SpanRecord>) {
    let mut cx = SpanContext::new(registry, clock);
    cx.set_baggage(METHOD, req.method);
    cx.set_baggage(ROUTE, req.route);
    cx.set_baggage(HANDLER, req.handler);
    cx.set_baggage(OPERATION, req.op.as_str());

    let result = chain.execute(&mut cx, |_| business_method(&req));
    (result, cx.finish())
}

fn business_method(req: &WorkRequest) -> Result<WorkReply, WorkError> {
    if !OPERATIONS.contains(&req.op.as_str()) {
        return Err(WorkError::NotFound(req.op.clone()));
    }
    std::thread::sleep(req.work);
    if req.fail {
        return Err(WorkError::Failed(format!("{} hit a simulated fault", req.op)));
    }

    // FNV-1a over the op name, so replies carry something deterministic
    let checksum = req.op.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    Ok(WorkReply {
        op: req.op.clone(),
        checksum,
    })
}

/// `Server-Timing` header value built from closed span records.
pub fn server_timing(records: &[SpanRecord]) -> String {
    records
        .iter()
        .rev()
        .map(|r| format!("{};dur={:.3}", r.name, r.duration().as_secs_f64() * 1000.0))
        .collect::<Vec<_>>()
        .join(", ")
}

fn copy_baggage(cx: &SpanContext, keys: &[&str]) -> LabelSet {
    keys.iter()
        .filter_map(|k| cx.baggage().get(k).map(|v| (*k, v)))
        .collect()
}
