//! Router configuration.
//!
//! ```
//! use std::time::Duration;
//! use helios_cohort::routing::RouterConfig;
//!
//! let config = RouterConfig::builder()
//!     .index_enabled(true)
//!     .indexed_dataset("cdr_2024q3")
//!     .index_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//!
//! assert!(config.is_indexed("cdr_2024q3"));
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Controls which backend the router prefers and the per-call deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Administrative switch for the search index.
    #[serde(default)]
    pub index_enabled: bool,

    /// Datasets with a registered person index.
    #[serde(default)]
    pub indexed_datasets: BTreeSet<String>,

    /// Deadline for one warehouse query.
    #[serde(with = "humantime_serde", default = "default_warehouse_timeout")]
    pub warehouse_timeout: Duration,

    /// Deadline for one index request.
    #[serde(with = "humantime_serde", default = "default_index_timeout")]
    pub index_timeout: Duration,
}

fn default_warehouse_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_index_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            index_enabled: false,
            indexed_datasets: BTreeSet::new(),
            warehouse_timeout: default_warehouse_timeout(),
            index_timeout: default_index_timeout(),
        }
    }
}

impl RouterConfig {
    /// Creates a new builder.
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::new()
    }

    /// Returns true if the index may be used for the dataset.
    pub fn is_indexed(&self, dataset: &str) -> bool {
        self.index_enabled && self.indexed_datasets.contains(dataset)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        if self.warehouse_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("warehouse_timeout"));
        }
        if self.index_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("index_timeout"));
        }

        if self.index_enabled && self.indexed_datasets.is_empty() {
            warnings.push(ConfigWarning::NoIndexedDatasets);
        }
        if self.index_enabled && self.index_timeout > self.warehouse_timeout {
            warnings.push(ConfigWarning::IndexSlowerThanWarehouse {
                index_timeout: self.index_timeout,
                warehouse_timeout: self.warehouse_timeout,
            });
        }

        Ok(warnings)
    }
}

/// Builder for [`RouterConfig`].
#[derive(Debug, Default)]
pub struct RouterConfigBuilder {
    config: RouterConfig,
}

impl RouterConfigBuilder {
    /// Creates a builder with default settings (index disabled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the search index.
    pub fn index_enabled(mut self, enabled: bool) -> Self {
        self.config.index_enabled = enabled;
        self
    }

    /// Registers an indexed dataset.
    pub fn indexed_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.config.indexed_datasets.insert(dataset.into());
        self
    }

    /// Sets the warehouse deadline.
    pub fn warehouse_timeout(mut self, timeout: Duration) -> Self {
        self.config.warehouse_timeout = timeout;
        self
    }

    /// Sets the index deadline.
    pub fn index_timeout(mut self, timeout: Duration) -> Self {
        self.config.index_timeout = timeout;
        self
    }

    /// Builds the configuration, validating it first. Warnings are logged.
    pub fn build(self) -> Result<RouterConfig, ConfigError> {
        let (config, warnings) = self.build_with_warnings()?;
        for warning in &warnings {
            warn!(%warning, "Router configuration warning");
        }
        Ok(config)
    }

    /// Builds the configuration and returns warnings.
    pub fn build_with_warnings(self) -> Result<(RouterConfig, Vec<ConfigWarning>), ConfigError> {
        let warnings = self.config.validate()?;
        Ok((self.config, warnings))
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A deadline of zero would fail every call.
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    /// A required collaborator was never supplied to a builder.
    #[error("no {0} configured")]
    MissingComponent(&'static str),
}

/// Configuration warnings (non-fatal issues).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The index is enabled but no dataset can use it.
    NoIndexedDatasets,

    /// The index deadline is longer than the warehouse one.
    IndexSlowerThanWarehouse {
        index_timeout: Duration,
        warehouse_timeout: Duration,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::NoIndexedDatasets => {
                write!(
                    f,
                    "search index is enabled but no dataset is registered - every plan will run on the warehouse"
                )
            }
            ConfigWarning::IndexSlowerThanWarehouse {
                index_timeout,
                warehouse_timeout,
            } => {
                write!(
                    f,
                    "index timeout ({}) exceeds warehouse timeout ({})",
                    humantime::format_duration(*index_timeout),
                    humantime::format_duration(*warehouse_timeout)
                )
            }
        }
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
