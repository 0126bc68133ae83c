//! Configuration types for the worker supervisor and execution unit

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Key under which the selected model is persisted
pub const DEFAULT_SETTINGS_KEY: &str = "bg-removal-selected-model";

/// Table that completed results are appended to
pub const DEFAULT_RECORDS_TABLE: &str = "images";

/// Resampling filter used to bring the model mask back to image resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskFilter {
    /// Nearest-neighbour sampling (hard mask edges)
    Nearest,
    /// Bilinear interpolation (soft mask edges)
    Bilinear,
}

impl Default for MaskFilter {
    fn default() -> Self {
        Self::Bilinear
    }
}

impl MaskFilter {
    #[must_use]
    pub fn filter_type(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Bilinear => image::imageops::FilterType::Triangle,
        }
    }
}

/// Configuration for the worker supervisor and its execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How long to wait for the execution unit's readiness signal (milliseconds)
    pub ready_timeout_ms: u64,

    /// Name of the dedicated execution unit thread
    pub thread_name: String,

    /// Buffer size of the user-facing notification channel
    pub notification_capacity: usize,

    /// Buffer size of the routed protocol message tap
    pub message_capacity: usize,

    /// Filter used when resizing the model mask to the input resolution
    pub mask_filter: MaskFilter,

    /// Keep the loaded model between requests that use the same model
    pub reuse_loaded_model: bool,

    /// Key-value store key for the persisted model selection
    pub settings_key: String,

    /// Record store table for completed results
    pub records_table: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 30_000,
            thread_name: "bgremove-worker".to_string(),
            notification_capacity: 64,
            message_capacity: 256,
            mask_filter: MaskFilter::default(),
            reuse_loaded_model: true,
            settings_key: DEFAULT_SETTINGS_KEY.to_string(),
            records_table: DEFAULT_RECORDS_TABLE.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON for this structure
    /// - Resulting configuration fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = std::fs::read_to_string(path_ref)
            .map_err(|e| BgRemovalError::file_io_error("read worker config", path_ref, &e))?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Handshake deadline as a [`Duration`]
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Zero handshake timeout or channel capacity
    /// - Empty thread name, settings key or table name
    pub fn validate(&self) -> Result<()> {
        if self.ready_timeout_ms == 0 {
            return Err(BgRemovalError::config_value_error(
                "ready_timeout_ms",
                self.ready_timeout_ms,
                "1 or more",
                Some(30_000),
            ));
        }
        if self.notification_capacity == 0 {
            return Err(BgRemovalError::config_value_error(
                "notification_capacity",
                self.notification_capacity,
                "1 or more",
                Some(64),
            ));
        }
        if self.message_capacity == 0 {
            return Err(BgRemovalError::config_value_error(
                "message_capacity",
                self.message_capacity,
                "1 or more",
                Some(256),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(BgRemovalError::invalid_config("Thread name must not be empty"));
        }
        if self.settings_key.is_empty() {
            return Err(BgRemovalError::invalid_config("Settings key must not be empty"));
        }
        if self.records_table.is_empty() {
            return Err(BgRemovalError::invalid_config("Records table must not be empty"));
        }
        Ok(())
    }
}

/// Builder for [`WorkerConfig`]
#[derive(Debug, Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.config.ready_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.thread_name = name.into();
        self
    }

    #[must_use]
    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.config.notification_capacity = capacity;
        self
    }

    #[must_use]
    pub fn message_capacity(mut self, capacity: usize) -> Self {
        self.config.message_capacity = capacity;
        self
    }

    #[must_use]
    pub fn mask_filter(mut self, filter: MaskFilter) -> Self {
        self.config.mask_filter = filter;
        self
    }

    #[must_use]
    pub fn reuse_loaded_model(mut self, reuse: bool) -> Self {
        self.config.reuse_loaded_model = reuse;
        self
    }

    #[must_use]
    pub fn settings_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.settings_key = key.into();
        self
    }

    #[must_use]
    pub fn records_table<S: Into<String>>(mut self, table: S) -> Self {
        self.config.records_table = table.into();
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Returns `BgRemovalError::InvalidConfig` when validation fails
    pub fn build(self) -> Result<WorkerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
