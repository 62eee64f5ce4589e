//! Dispatch configuration.
//!
//! Loaded from a YAML file:
//!
//! ```yaml
//! worker:
//!   program: node
//!   entry: /opt/pte/pte-main.js
//!   timeout: 30m
//! metrics:
//!   request_timeout: 10s
//! topology:
//!   organizations:
//!     org1:
//!       peers:
//!         peer0-org1: { metrics_url: "http://peer0-org1:9443" }
//!       channels:
//!         mychannel: [peer0-org1]
//! ```

use crate::error::ConfigError;
use crate::metrics::{DEFAULT_TRANSACTION_TYPE, DEFAULT_VALIDATION_CODE};
use crate::topology::TopologyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interpreter or executable to run.
    #[serde(default = "default_worker_program")]
    pub program: String,
    /// First argument passed to `program`, usually the worker script.
    pub entry: PathBuf,
    /// The worker is killed if it runs longer than this.
    #[serde(default = "default_worker_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_worker_program() -> String {
    "node".to_string()
}

fn default_worker_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Peer metrics scraping settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Timeout for a single `GET /metrics` request.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// `transaction_type` label of the counted transactions.
    #[serde(default = "default_transaction_type")]
    pub transaction_type: String,
    /// `validation_code` label of the counted transactions.
    #[serde(default = "default_validation_code")]
    pub validation_code: String,
    /// Responses larger than this are rejected.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_transaction_type() -> String {
    DEFAULT_TRANSACTION_TYPE.to_string()
}

fn default_validation_code() -> String {
    DEFAULT_VALIDATION_CODE.to_string()
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            transaction_type: default_transaction_type(),
            validation_code: default_validation_code(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Complete configuration for a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub worker: WorkerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
}

impl DispatchConfig {
    /// Read, parse and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.program.trim().is_empty() {
            return Err(ConfigError::Invalid("worker.program is empty".into()));
        }
        if self.worker.entry.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("worker.entry is empty".into()));
        }
        if self.worker.timeout.is_zero() {
            return Err(ConfigError::Invalid("worker.timeout must be non-zero".into()));
        }
        if self.metrics.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "metrics.request_timeout must be non-zero".into(),
            ));
        }
        if self.metrics.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "metrics.max_body_bytes must be non-zero".into(),
            ));
        }
        self.topology
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
