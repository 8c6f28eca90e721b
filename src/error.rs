use std::path::PathBuf;

use thiserror::Error;

use crate::span::SpanId;

// ─── Instrumentation usage ───────────────────────────────────────

/// Misuse of the span API. These indicate an instrumentation bug and are
/// always handed back to the caller instead of being swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpanError {
    /// The unit of work owning the context has already been torn down.
    #[error("span context {context} is closed; no unit of work is active")]
    ContextClosed { context: uuid::Uuid },

    /// The handle was issued by a different span context.
    #[error("span handle belongs to context {handle_context}, not {context}")]
    ForeignHandle {
        context: uuid::Uuid,
        handle_context: uuid::Uuid,
    },

    /// The span is not open (already closed, or force-closed by a repair).
    #[error("span {span} is not open")]
    NotOpen { span: SpanId },
}

// ─── Chain construction ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("layers `{first}` and `{second}` share rank {rank}; ranks must be unique")]
    DuplicateRank {
        rank: u16,
        first: String,
        second: String,
    },

    #[error("an interceptor chain needs at least one layer")]
    Empty,
}

// ─── Configuration ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ─── Export transport ────────────────────────────────────────────

/// Failure of a single push attempt. The push exporter retries and
/// eventually drops; request handling never sees these.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink rejected batch {sequence}: {reason}")]
    Rejected { sequence: u64, reason: String },

    #[error("sending batch {sequence} timed out after {timeout_ms}ms")]
    TimedOut { sequence: u64, timeout_ms: u64 },
}

// ─── Aggregation ─────────────────────────────────────────────────

/// Shards or snapshots can only be merged when their bucket layouts match.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error("bucket layouts differ (base {left} x {left_len} vs base {right} x {right_len})")]
    LayoutMismatch {
        left: f64,
        left_len: usize,
        right: f64,
        right_len: usize,
    },
}
