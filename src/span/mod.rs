//! Timed scopes and the samples they produce.

mod context;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::clock::Reading;
use crate::labels::LabelSet;

pub use context::{CloseReport, SpanContext};

/// Span identity, unique within its [`SpanContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SpanId(u64);

impl SpanId {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "span#{}", self.0)
    }
}

/// How the work inside a span ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Error,
    Cancelled,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket returned by [`SpanContext::open`]; needed to annotate or close
/// the span. Tied to the context that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanHandle {
    context: uuid::Uuid,
    span: SpanId,
}

impl SpanHandle {
    pub fn id(&self) -> SpanId {
        self.span
    }

    pub fn context(&self) -> uuid::Uuid {
        self.context
    }
}

/// A span that has been closed. `end >= start` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub id: SpanId,
    pub parent_id: Option<SpanId>,
    pub name: String,
    pub labels: LabelSet,
    pub start: Reading,
    pub end: Reading,
    pub outcome: Outcome,
}

impl SpanRecord {
    pub fn duration(&self) -> Duration {
        self.end.checked_since(self.start).unwrap_or_default()
    }
}

/// One completed measurement, routed to exactly one aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerSample {
    pub metric_name: String,
    pub labels: LabelSet,
    pub duration: Duration,
}
