//! Startup configuration surface.
//!
//! ```toml
//! key_policy = "name_and_labels"
//!
//! [aggregator]
//! base = 1.15          # relative-error control
//! bucket_count = 192   # range / resolution control
//! shards = 16
//!
//! [export]
//! interval_ms = 10000  # staleness bound
//! retry_attempts = 3   # push resilience
//! backoff_initial_ms = 100
//! backoff_max_ms = 2000
//! send_timeout_ms = 5000
//! format = "text"
//! include_buckets = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::labels::KeyPolicy;

// ─── Top level ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservatoryConfig {
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub key_policy: KeyPolicy,
}

impl ObservatoryConfig {
    /// Parses and validates a TOML document. Missing fields take defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aggregator.validate()?;
        self.export.validate()
    }
}

// ─── Aggregator ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Growth factor between bucket boundaries; `base - 1` is the worst
    /// relative error of a quantile estimate.
    #[serde(default = "default_base")]
    pub base: f64,

    /// Number of buckets; the top bucket starts at `base^(bucket_count-1)` ns.
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,

    /// Independent partial histograms per aggregator, merged on snapshot.
    #[serde(default = "default_shards")]
    pub shards: usize,
}

fn default_base() -> f64 {
    1.15
}
fn default_bucket_count() -> usize {
    192
}
fn default_shards() -> usize {
    16
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            base: default_base(),
            bucket_count: default_bucket_count(),
            shards: default_shards(),
        }
    }
}

impl AggregatorConfig {
    /// `self` if it validates, otherwise the defaults.
    pub fn or_default(&self) -> AggregatorConfig {
        match self.validate() {
            Ok(()) => self.clone(),
            Err(err) => {
                warn!(%err, "invalid aggregator config; falling back to defaults");
                AggregatorConfig::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base.is_finite() || self.base <= 1.0 {
            return Err(invalid("aggregator.base", "must be a finite number > 1"));
        }
        if self.bucket_count == 0 || self.bucket_count > 4_096 {
            return Err(invalid("aggregator.bucket_count", "must be between 1 and 4096"));
        }
        if !self.base.powi(self.bucket_count as i32).is_finite() {
            return Err(invalid(
                "aggregator.bucket_count",
                "base^bucket_count overflows f64",
            ));
        }
        if self.shards == 0 || self.shards > 1_024 {
            return Err(invalid("aggregator.shards", "must be between 1 and 1024"));
        }
        Ok(())
    }
}

// ─── Export ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpositionFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Total send attempts per batch before it is dropped.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Upper bound on one send attempt; a hung sink counts as a failure.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default)]
    pub format: ExpositionFormat,

    /// Emit raw cumulative buckets alongside the quantile summary.
    #[serde(default)]
    pub include_buckets: bool,
}

fn default_interval_ms() -> u64 {
    10_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_backoff_initial_ms() -> u64 {
    100
}
fn default_backoff_max_ms() -> u64 {
    2_000
}
fn default_send_timeout_ms() -> u64 {
    5_000
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            retry_attempts: default_retry_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            format: ExpositionFormat::default(),
            include_buckets: false,
        }
    }
}

impl ExportConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based): doubles from the
    /// initial backoff, capped at the maximum.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .backoff_initial_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(invalid("export.interval_ms", "must be > 0"));
        }
        if self.retry_attempts == 0 {
            return Err(invalid("export.retry_attempts", "must be >= 1"));
        }
        if self.send_timeout_ms == 0 {
            return Err(invalid("export.send_timeout_ms", "must be > 0"));
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(invalid(
                "export.backoff_initial_ms",
                "must not exceed backoff_max_ms",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_owned(),
    }
}
