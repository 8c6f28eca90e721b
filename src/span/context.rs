use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::{Outcome, SpanHandle, SpanId, SpanRecord, TimerSample};
use crate::clock::{Clock, Reading};
use crate::error::SpanError;
use crate::labels::LabelSet;
use crate::registry::MetricsRegistry;

/// Label carrying the span outcome on every emitted sample.
pub const OUTCOME_LABEL: &str = "outcome";

struct OpenSpan {
    id: SpanId,
    parent_id: Option<SpanId>,
    name: String,
    labels: LabelSet,
    start: Reading,
}

/// Result of a successful [`SpanContext::close`].
#[derive(Debug, Clone, PartialEq)]
pub struct CloseReport {
    pub record: SpanRecord,
    /// Descendants that were still open and got force-closed as
    /// `cancelled`, innermost first. Non-empty means a nesting bug.
    pub force_closed: Vec<SpanId>,
}

impl CloseReport {
    pub fn was_repaired(&self) -> bool {
        !self.force_closed.is_empty()
    }
}

/// The stack of open spans owned by one unit of work.
///
/// Created when the outermost layer starts handling the work; nested layers
/// borrow it (`&mut SpanContext`), never copy it. Dropping the context (for
/// instance when an async task is cancelled) force-closes every span still
/// open with [`Outcome::Cancelled`].
pub struct SpanContext {
    id: Uuid,
    clock: Arc<dyn Clock>,
    registry: Arc<MetricsRegistry>,
    stack: Vec<OpenSpan>,
    records: Vec<SpanRecord>,
    baggage: LabelSet,
    next_span: u64,
    closed: bool,
    /// Latest reading handed to any span; readings never go below it.
    high_water: Reading,
}

impl SpanContext {
    pub fn new(registry: Arc<MetricsRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            clock,
            registry,
            stack: Vec::with_capacity(8),
            records: Vec::new(),
            baggage: LabelSet::new(),
            next_span: 1,
            closed: false,
            high_water: Reading::from_nanos(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle of the innermost open span.
    pub fn current(&self) -> Option<SpanHandle> {
        self.stack.last().map(|s| self.handle(s.id))
    }

    /// Unit-of-work attributes (route, operation, ...) set by the outermost
    /// glue and readable by every layer. Not attached to spans unless a
    /// layer copies them into its labels.
    pub fn baggage(&self) -> &LabelSet {
        &self.baggage
    }

    pub fn set_baggage(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.baggage.insert(key, value);
    }

    /// Spans closed so far, in closing order.
    pub fn records(&self) -> &[SpanRecord] {
        &self.records
    }

    /// Opens a span whose parent is the current top of the stack.
    pub fn open(
        &mut self,
        name: impl Into<String>,
        labels: LabelSet,
    ) -> Result<SpanHandle, SpanError> {
        if self.closed {
            return Err(self.usage_error(SpanError::ContextClosed { context: self.id }));
        }

        let start = self.read_clock();
        let parent = self.stack.last().map(|p| p.id);

        let id = SpanId(self.next_span);
        self.next_span += 1;
        self.stack.push(OpenSpan {
            id,
            parent_id: parent,
            name: name.into(),
            labels,
            start,
        });
        Ok(self.handle(id))
    }

    /// Attaches a label to an open span before it closes.
    pub fn annotate(
        &mut self,
        handle: SpanHandle,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SpanError> {
        let pos = self.position_of(handle)?;
        self.stack[pos].labels.insert(key, value);
        Ok(())
    }

    /// Closes the span behind `handle`.
    ///
    /// The span should be the top of the stack. If descendants are still
    /// open the nesting is broken: they are force-closed as `cancelled`
    /// (counted and logged as a structural repair) and this close then
    /// completes normally with the requested outcome.
    pub fn close(
        &mut self,
        handle: SpanHandle,
        outcome: Outcome,
    ) -> Result<CloseReport, SpanError> {
        let pos = self.position_of(handle)?;
        let end = self.read_clock();

        let mut force_closed = Vec::new();
        if pos + 1 < self.stack.len() {
            let stale = self.stack.split_off(pos + 1);
            for span in stale.into_iter().rev() {
                force_closed.push(span.id);
                self.seal(span, end, Outcome::Cancelled);
            }
            self.registry
                .diagnostics()
                .record_structural_repair(force_closed.len() as u64);
            warn!(
                context = %self.id,
                span = %self.stack[pos].name,
                force_closed = force_closed.len(),
                "span closed with open descendants; force-closed them as cancelled"
            );
        }

        let span = self.stack.remove(pos);
        let record = self.seal(span, end, outcome);
        Ok(CloseReport {
            record,
            force_closed,
        })
    }

    /// Force-closes every open span as `cancelled`, innermost first.
    /// Returns how many were closed.
    pub fn cancel_all(&mut self) -> usize {
        if self.stack.is_empty() {
            return 0;
        }
        let end = self.read_clock();
        let open = std::mem::take(&mut self.stack);
        let n = open.len();
        for span in open.into_iter().rev() {
            self.seal(span, end, Outcome::Cancelled);
        }
        self.registry
            .diagnostics()
            .record_forced_cancellations(n as u64);
        n
    }

    /// Ends the unit of work: cancels whatever is still open and rejects
    /// any further `open`. Idempotent.
    pub fn teardown(&mut self) -> usize {
        let cancelled = self.cancel_all();
        self.closed = true;
        cancelled
    }

    /// Tears the context down and hands back every span record.
    pub fn finish(mut self) -> Vec<SpanRecord> {
        self.teardown();
        std::mem::take(&mut self.records)
    }

    /// Runs `body` inside a span named `name`, closing it on every exit
    /// path: `ok` for `Ok`, `error` for `Err` or a panic (which is then
    /// resumed). `annotate` may add labels derived from the result. If the
    /// span cannot be opened the body still runs, unmeasured.
    pub fn scoped<T, E>(
        &mut self,
        name: &str,
        labels: LabelSet,
        body: impl FnOnce(&mut SpanContext) -> Result<T, E>,
        annotate: impl FnOnce(&Result<T, E>, &mut LabelSet),
    ) -> Result<T, E> {
        let handle = match self.open(name, labels) {
            Ok(h) => Some(h),
            Err(err) => {
                warn!(%err, span = name, "running without a span");
                None
            }
        };

        let result = match panic::catch_unwind(AssertUnwindSafe(|| body(&mut *self))) {
            Ok(result) => result,
            Err(payload) => {
                if let Some(h) = handle {
                    if let Err(err) = self.close(h, Outcome::Error) {
                        warn!(%err, span = name, "span could not be closed after a panic");
                    }
                }
                panic::resume_unwind(payload);
            }
        };

        if let Some(h) = handle {
            let mut extra = LabelSet::new();
            annotate(&result, &mut extra);
            let outcome = if result.is_ok() {
                Outcome::Ok
            } else {
                Outcome::Error
            };
            let closed = extra
                .iter()
                .try_for_each(|(k, v)| self.annotate(h, k, v))
                .and_then(|()| self.close(h, outcome));
            if let Err(err) = closed {
                warn!(%err, span = name, "span could not be closed");
            }
        }
        result
    }

    /// Convenience for an explicitly registered, unlabelled operation.
    pub fn timed<T, E>(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut SpanContext) -> Result<T, E>,
    ) -> Result<T, E> {
        self.scoped(name, LabelSet::new(), body, |_, _| {})
    }

    // ── internals ───────────────────────────────────────────────

    /// Clock reading clamped to the context's high-water mark, so a span
    /// can neither start before its parent nor end before anything that
    /// already closed.
    fn read_clock(&mut self) -> Reading {
        let now = self.clock.now();
        if now < self.high_water {
            self.registry.diagnostics().record_clock_anomaly();
            warn!(
                context = %self.id,
                now = now.as_nanos(),
                high_water = self.high_water.as_nanos(),
                "clock went backwards within a unit of work; holding at the last reading"
            );
            return self.high_water;
        }
        self.high_water = now;
        now
    }

    fn handle(&self, span: SpanId) -> SpanHandle {
        SpanHandle {
            context: self.id,
            span,
        }
    }

    fn position_of(&self, handle: SpanHandle) -> Result<usize, SpanError> {
        if self.closed {
            return Err(self.usage_error(SpanError::ContextClosed { context: self.id }));
        }
        if handle.context != self.id {
            return Err(self.usage_error(SpanError::ForeignHandle {
                context: self.id,
                handle_context: handle.context,
            }));
        }
        self.stack
            .iter()
            .rposition(|s| s.id == handle.span)
            .ok_or_else(|| self.usage_error(SpanError::NotOpen { span: handle.span }))
    }

    fn usage_error(&self, err: SpanError) -> SpanError {
        self.registry.diagnostics().record_usage_error();
        err
    }

    /// Turns an open span into a record and emits its sample.
    fn seal(&mut self, span: OpenSpan, end: Reading, outcome: Outcome) -> SpanRecord {
        let duration = self.registry.diagnostics().elapsed(span.start, end);
        let end = end.max(span.start);

        let mut sample_labels = span.labels.clone();
        sample_labels.insert(OUTCOME_LABEL, outcome.as_str());
        self.registry.record(&TimerSample {
            metric_name: span.name.clone(),
            labels: sample_labels,
            duration,
        });

        let record = SpanRecord {
            id: span.id,
            parent_id: span.parent_id,
            name: span.name,
            labels: span.labels,
            start: span.start,
            end,
            outcome,
        };
        self.records.push(record.clone());
        record
    }
}

impl Drop for SpanContext {
    fn drop(&mut self) {
        if !self.closed {
            self.teardown();
        }
    }
}
