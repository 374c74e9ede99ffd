//! Configuration management for the aggregator
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.
//!
//! # Example
//!
//! ```toml
//! [push]
//! period_ms = 5000
//! instance = "checkout"
//!
//! [summary]
//! window_ms = 60000
//! buckets = 4
//!
//! [[summary.quantiles]]
//! quantile = 0.5
//! error = 0.05
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result, ValidationError};
use crate::quantile::QuantileTarget;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Push cycle configuration
    #[serde(default)]
    pub push: PushConfig,

    /// Registry capacities and expiration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Summary quantile configuration
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Ingestion queue configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

/// Push cycle configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PushConfig {
    /// Cycle period in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Instance identifier, the first half of the job id
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Track only the summary statistic for delay series
    #[serde(default)]
    pub summary_only: bool,

    /// Delete the job before every N-th push
    #[serde(default = "default_clear_every_cycles")]
    pub clear_every_cycles: u64,
}

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// A series unused for longer than this is evicted, in milliseconds
    #[serde(default = "default_expiration_ms")]
    pub expiration_ms: u64,

    /// Maximum count index names
    #[serde(default = "default_count_index_capacity")]
    pub count_index_capacity: usize,

    /// Maximum series per count index
    #[serde(default = "default_series_capacity")]
    pub count_series_capacity: usize,

    /// Maximum delay series
    #[serde(default = "default_series_capacity")]
    pub delay_series_capacity: usize,
}

/// Summary configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SummaryConfig {
    /// Quantile retention window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Age buckets the window is split into
    #[serde(default = "default_buckets")]
    pub buckets: usize,

    /// Default capacity of the per-series average and variance rings
    #[serde(default = "default_ring_size")]
    pub ring_size: usize,

    /// Target quantiles and their rank error bounds
    #[serde(default = "default_quantiles")]
    pub quantiles: Vec<QuantileSpec>,
}

/// One target quantile
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct QuantileSpec {
    /// Target quantile in [0, 1]
    pub quantile: f64,

    /// Allowed rank error in [0, 1]
    pub error: f64,
}

/// Ingestion configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Bounded record queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// Default value functions
fn default_period_ms() -> u64 { 5_000 }
fn default_instance() -> String { "default".to_string() }
fn default_clear_every_cycles() -> u64 { 3_600 }
fn default_expiration_ms() -> u64 { 10_000 }
fn default_count_index_capacity() -> usize { 100 }
fn default_series_capacity() -> usize { 10_000 }
fn default_window_ms() -> u64 { 60_000 }
fn default_buckets() -> usize { 4 }
fn default_ring_size() -> usize { 10_000 }
fn default_queue_capacity() -> usize { 1_000 }
fn default_quantiles() -> Vec<QuantileSpec> {
    [(0.5, 0.05), (0.9, 0.01), (0.99, 0.001), (0.999, 0.0001)]
        .into_iter()
        .map(|(quantile, error)| QuantileSpec { quantile, error })
        .collect()
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            instance: default_instance(),
            summary_only: false,
            clear_every_cycles: default_clear_every_cycles(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            expiration_ms: default_expiration_ms(),
            count_index_capacity: default_count_index_capacity(),
            count_series_capacity: default_series_capacity(),
            delay_series_capacity: default_series_capacity(),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            buckets: default_buckets(),
            ring_size: default_ring_size(),
            quantiles: default_quantiles(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl PushConfig {
    /// Cycle period
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl SummaryConfig {
    /// Quantile retention window
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Validated quantile targets
    pub fn targets(&self) -> std::result::Result<Arc<[QuantileTarget]>, ValidationError> {
        self.quantiles
            .iter()
            .map(|q| QuantileTarget::new(q.quantile, q.error))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Into::into)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> std::result::Result<Self, ValidationError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Fails on the first variable that is set but does not parse; settings
    /// applied before it are kept.
    pub fn apply_env_overrides(&mut self) -> std::result::Result<(), ValidationError> {
        // Push
        override_parsed("AGGREGATOR_PUSH_PERIOD_MS", &mut self.push.period_ms)?;
        if let Ok(instance) = std::env::var("AGGREGATOR_INSTANCE") {
            self.push.instance = instance;
        }
        override_parsed("AGGREGATOR_SUMMARY_ONLY", &mut self.push.summary_only)?;
        override_parsed("AGGREGATOR_CLEAR_EVERY_CYCLES", &mut self.push.clear_every_cycles)?;

        // Registry
        override_parsed("AGGREGATOR_EXPIRATION_MS", &mut self.registry.expiration_ms)?;

        // Summary
        override_parsed("AGGREGATOR_SUMMARY_WINDOW_MS", &mut self.summary.window_ms)?;
        override_parsed("AGGREGATOR_SUMMARY_BUCKETS", &mut self.summary.buckets)?;

        // Ingestion
        override_parsed("AGGREGATOR_QUEUE_CAPACITY", &mut self.ingestion.queue_capacity)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.push.instance.is_empty() {
            return Err(ValidationError::MissingField("push.instance".to_string()));
        }

        positive("push.period_ms", self.push.period_ms)?;
        positive("push.clear_every_cycles", self.push.clear_every_cycles)?;
        positive("registry.count_index_capacity", self.registry.count_index_capacity as u64)?;
        positive("registry.count_series_capacity", self.registry.count_series_capacity as u64)?;
        positive("registry.delay_series_capacity", self.registry.delay_series_capacity as u64)?;
        positive("summary.window_ms", self.summary.window_ms)?;
        positive("summary.buckets", self.summary.buckets as u64)?;
        positive("summary.ring_size", self.summary.ring_size as u64)?;
        positive("ingestion.queue_capacity", self.ingestion.queue_capacity as u64)?;

        if self.summary.window_ms < self.summary.buckets as u64 {
            return Err(ValidationError::InvalidFormat {
                field: "summary.window_ms".to_string(),
                message: format!(
                    "{} ms cannot be split into {} buckets",
                    self.summary.window_ms, self.summary.buckets
                ),
            });
        }

        for (i, q) in self.summary.quantiles.iter().enumerate() {
            if !(0.0..=1.0).contains(&q.quantile) {
                return Err(ValidationError::out_of_range(
                    &format!("summary.quantiles[{}].quantile", i),
                    q.quantile,
                    0,
                    1,
                ));
            }
            if !(0.0..=1.0).contains(&q.error) {
                return Err(ValidationError::out_of_range(
                    &format!("summary.quantiles[{}].error", i),
                    q.error,
                    0,
                    1,
                ));
            }
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }
}

fn override_parsed<T>(var: &str, target: &mut T) -> std::result::Result<(), ValidationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(var) {
        *target = raw.parse().map_err(|e: T::Err| ValidationError::InvalidFormat {
            field: var.to_string(),
            message: format!("{:?}: {}", raw, e),
        })?;
        tracing::debug!(var, value = %raw, "Applied config override");
    }
    Ok(())
}

fn positive(field: &str, value: u64) -> std::result::Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::out_of_range(field, 0, 1, u64::MAX));
    }
    Ok(())
}
