//! Layered latency instrumentation and metrics aggregation.
//!
//! A unit of work (one request, one job) owns a [`SpanContext`]. An ordered
//! [`Chain`] of [`Interceptor`] layers opens and closes one span per layer
//! around the work; every closed span becomes a [`TimerSample`] routed to
//! the [`Aggregator`] for its metric key in the [`MetricsRegistry`].
//! Exporters turn registry snapshots into a versioned exposition.
//!
//! ```
//! use std::sync::Arc;
//! use latency_observatory::{
//!     Chain, LayerRank, MetricsRegistry, MonotonicClock, NamedLayer, PullExporter,
//!     ExpositionOptions,
//! };
//!
//! let registry = Arc::new(MetricsRegistry::default());
//! let chain = Chain::<u32, String>::builder()
//!     .layer(LayerRank::TRANSPORT, NamedLayer::new("http"))
//!     .layer(LayerRank::METHOD, NamedLayer::new("orders.load"))
//!     .build()
//!     .unwrap();
//!
//! let (result, spans) = chain.run_unit(registry.clone(), Arc::new(MonotonicClock::new()), |_| Ok(42));
//! assert_eq!(result, Ok(42));
//! assert_eq!(spans.len(), 2);
//!
//! let text = PullExporter::new(registry, ExpositionOptions::default()).render();
//! assert!(text.contains("orders.load{outcome=\"ok\"} count=1"));
//! ```

pub mod aggregator;
pub mod chain;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod labels;
pub mod registry;
pub mod span;

pub use aggregator::{Aggregator, AggregatorSnapshot, LogBuckets, PercentileSet};
pub use chain::{Chain, ChainBuilder, Interceptor, LayerRank, NamedLayer, Next};
pub use clock::{Clock, ManualClock, MonotonicClock, Reading};
pub use config::{AggregatorConfig, ExportConfig, ExpositionFormat, ObservatoryConfig};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use error::{ChainError, ConfigError, MergeError, SpanError, TransportError};
pub use export::{
    CycleOutcome, ExportBatch, ExpositionOptions, FileTransport, PullExporter, PushExporter,
    PushHandle, Transport,
};
pub use labels::{KeyPolicy, LabelSet, MetricKey};
pub use registry::{MetricsRegistry, RegistrySnapshot};
pub use span::{CloseReport, Outcome, SpanContext, SpanHandle, SpanId, SpanRecord, TimerSample};
