//! Getting registry snapshots out of the process.
//!
//! [`PullExporter`] renders on demand (a scrape); [`PushExporter`] sends on
//! its own timer and absorbs every transport failure itself.

pub mod exposition;
pub mod pull;
pub mod push;

pub use exposition::{encode, ExpositionOptions, EXPOSITION_VERSION};
pub use pull::PullExporter;
pub use push::{CycleOutcome, ExportBatch, FileTransport, PushExporter, PushHandle, Transport};
