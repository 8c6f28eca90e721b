use std::sync::Arc;

use chrono::Utc;

use super::exposition::{encode, ExpositionOptions};
use crate::config::ExpositionFormat;
use crate::registry::MetricsRegistry;

/// Answers scrapes with the latest registry snapshot.
///
/// Rendering only takes the registry's shared map lock and each shard lock
/// briefly, so it can run concurrently with ingestion.
#[derive(Clone)]
pub struct PullExporter {
    registry: Arc<MetricsRegistry>,
    options: ExpositionOptions,
}

impl PullExporter {
    pub fn new(registry: Arc<MetricsRegistry>, options: ExpositionOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &ExpositionOptions {
        &self.options
    }

    pub fn content_type(&self) -> &'static str {
        self.options.content_type()
    }

    pub fn render(&self) -> String {
        encode(&self.registry.snapshot_all(), &self.options, Utc::now())
    }

    /// Renders in `format`, keeping the other options.
    pub fn render_as(&self, format: ExpositionFormat) -> String {
        let options = ExpositionOptions {
            format,
            ..self.options
        };
        encode(&self.registry.snapshot_all(), &options, Utc::now())
    }
}
