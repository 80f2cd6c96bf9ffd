//! Configuration types for the ETL pipeline.
//!
//! This module provides configuration options using the builder pattern.
//! A configuration can also be read from a JSON file; missing fields fall
//! back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EtlError, Result};

/// Event keys dropped by the event cleanup before deduplication.
pub const DEFAULT_EXCLUDED_EVENTS: [&str; 3] = ["$session_start", "$session_end", "$page_view"];

/// Configuration for the ETL pipeline.
///
/// Use [`EtlConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use etl_processing::config::EtlConfig;
///
/// let config = EtlConfig::builder()
///     .bucket("warehouse")
///     .loader_memory_ceiling(80.0)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// Bucket that holds both raw and processed tables.
    /// Default: "etl-warehouse"
    pub bucket: String,

    /// Namespace that cleaned tables are written under.
    /// Default: "processed"
    pub output_dataset: String,

    /// Local directory used for temporary download/upload files.
    /// Default: the system temp directory
    pub staging_dir: PathBuf,

    /// Service-account key path. Falls back to `GOOGLE_APPLICATION_CREDENTIALS`.
    /// Default: None
    pub credentials_path: Option<PathBuf>,

    /// Memory usage (percent) above which the loader refuses to start a transfer.
    /// Default: 85.0
    pub loader_memory_ceiling: f64,

    /// Memory usage (percent) above which a task or a run is refused.
    /// Default: 90.0
    pub memory_high_water: f64,

    /// Disk usage (percent) of the staging location above which a run is refused.
    /// Default: 90.0
    pub disk_high_water: f64,

    /// Objects larger than this (MB) are logged as a warning before loading.
    /// Default: 1000.0
    pub large_object_warn_mb: f64,

    /// Timeout for a single upload, in seconds.
    /// Default: 300
    pub upload_timeout_secs: u64,

    /// Pause between sequential tasks, in milliseconds.
    /// Default: 1000
    pub pause_between_tasks_ms: u64,

    /// Event keys removed by the event cleanup.
    /// Default: [`DEFAULT_EXCLUDED_EVENTS`]
    pub excluded_events: Vec<String>,

    /// How many event keys to list in the post-cleanup frequency report.
    /// Default: 10
    pub top_event_types: usize,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            bucket: "etl-warehouse".to_string(),
            output_dataset: "processed".to_string(),
            staging_dir: std::env::temp_dir(),
            credentials_path: None,
            loader_memory_ceiling: 85.0,
            memory_high_water: 90.0,
            disk_high_water: 90.0,
            large_object_warn_mb: 1000.0,
            upload_timeout_secs: 300,
            pause_between_tasks_ms: 1000,
            excluded_events: DEFAULT_EXCLUDED_EVENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            top_event_types: 10,
        }
    }
}

impl EtlConfig {
    /// Create a new configuration builder.
    pub fn builder() -> EtlConfigBuilder {
        EtlConfigBuilder::default()
    }

    /// Read a configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EtlError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: EtlConfig = serde_json::from_str(&content)?;
        config
            .validate()
            .map_err(|e| EtlError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        for (field, value) in [
            ("loader_memory_ceiling", self.loader_memory_ceiling),
            ("memory_high_water", self.memory_high_water),
            ("disk_high_water", self.disk_high_water),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigValidationError::InvalidPercentage {
                    field: field.to_string(),
                    value,
                });
            }
        }

        if self.bucket.trim().is_empty() {
            return Err(ConfigValidationError::EmptyField("bucket".to_string()));
        }

        if self.output_dataset.trim().is_empty() {
            return Err(ConfigValidationError::EmptyField(
                "output_dataset".to_string(),
            ));
        }

        if self.upload_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidTimeout(
                self.upload_timeout_secs,
            ));
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid percentage for '{field}': {value} (must be between 0 and 100)")]
    InvalidPercentage { field: String, value: f64 },

    #[error("Field '{0}' must not be empty")]
    EmptyField(String),

    #[error("Invalid upload timeout: {0}s (must be at least 1)")]
    InvalidTimeout(u64),
}

impl From<ConfigValidationError> for EtlError {
    fn from(err: ConfigValidationError) -> Self {
        EtlError::InvalidConfig(err.to_string())
    }
}

/// Builder for [`EtlConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct EtlConfigBuilder {
    bucket: Option<String>,
    output_dataset: Option<String>,
    staging_dir: Option<PathBuf>,
    credentials_path: Option<PathBuf>,
    loader_memory_ceiling: Option<f64>,
    memory_high_water: Option<f64>,
    disk_high_water: Option<f64>,
    large_object_warn_mb: Option<f64>,
    upload_timeout_secs: Option<u64>,
    pause_between_tasks_ms: Option<u64>,
    excluded_events: Option<Vec<String>>,
    top_event_types: Option<usize>,
}

impl EtlConfigBuilder {
    /// Set the bucket name.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the namespace cleaned tables are written under.
    pub fn output_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.output_dataset = Some(dataset.into());
        self
    }

    /// Set the local staging directory for temporary files.
    pub fn staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(path.into());
        self
    }

    /// Set an explicit service-account key path.
    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    /// Set the loader's memory ceiling (percent).
    pub fn loader_memory_ceiling(mut self, pct: f64) -> Self {
        self.loader_memory_ceiling = Some(pct);
        self
    }

    /// Set the memory high-water mark (percent).
    pub fn memory_high_water(mut self, pct: f64) -> Self {
        self.memory_high_water = Some(pct);
        self
    }

    /// Set the staging disk high-water mark (percent).
    pub fn disk_high_water(mut self, pct: f64) -> Self {
        self.disk_high_water = Some(pct);
        self
    }

    /// Set the size (MB) above which a load logs a large-object warning.
    pub fn large_object_warn_mb(mut self, mb: f64) -> Self {
        self.large_object_warn_mb = Some(mb);
        self
    }

    /// Set the upload timeout in seconds.
    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.upload_timeout_secs = Some(secs);
        self
    }

    /// Set the pause between sequential tasks in milliseconds.
    pub fn pause_between_tasks_ms(mut self, ms: u64) -> Self {
        self.pause_between_tasks_ms = Some(ms);
        self
    }

    /// Replace the event exclusion set.
    pub fn excluded_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    /// Set the size of the post-cleanup event frequency report.
    pub fn top_event_types(mut self, n: usize) -> Self {
        self.top_event_types = Some(n);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `EtlConfig` or an error if validation fails.
    pub fn build(self) -> std::result::Result<EtlConfig, ConfigValidationError> {
        let defaults = EtlConfig::default();
        let config = EtlConfig {
            bucket: self.bucket.unwrap_or(defaults.bucket),
            output_dataset: self.output_dataset.unwrap_or(defaults.output_dataset),
            staging_dir: self.staging_dir.unwrap_or(defaults.staging_dir),
            credentials_path: self.credentials_path,
            loader_memory_ceiling: self
                .loader_memory_ceiling
                .unwrap_or(defaults.loader_memory_ceiling),
            memory_high_water: self.memory_high_water.unwrap_or(defaults.memory_high_water),
            disk_high_water: self.disk_high_water.unwrap_or(defaults.disk_high_water),
            large_object_warn_mb: self
                .large_object_warn_mb
                .unwrap_or(defaults.large_object_warn_mb),
            upload_timeout_secs: self
                .upload_timeout_secs
                .unwrap_or(defaults.upload_timeout_secs),
            pause_between_tasks_ms: self
                .pause_between_tasks_ms
                .unwrap_or(defaults.pause_between_tasks_ms),
            excluded_events: self.excluded_events.unwrap_or(defaults.excluded_events),
            top_event_types: self.top_event_types.unwrap_or(defaults.top_event_types),
        };

        config.validate()?;
        Ok(config)
    }
}
