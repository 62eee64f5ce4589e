//! Error types for the dispatch pipeline.
//!
//! Every error here is scoped to a single execution unit. Nothing in this
//! module is ever propagated across unit boundaries: the dispatcher records
//! a [`UnitError`] against the failing index and keeps going.

use crate::consistency::Mismatch;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure to launch or complete the external worker process.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// The process could not be started at all.
    #[error("failed to spawn `{program}`: {reason}")]
    Spawn { program: String, reason: String },
    /// The process ran but exited unsuccessfully.
    #[error("worker exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    /// The process did not exit within the configured timeout and was killed.
    #[error("worker did not finish within {0:?}")]
    Timeout(Duration),
}

/// A metrics document that could not be tokenized or did not contain the
/// requested counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A non-comment line is not a `name{labels} value` sample.
    #[error("line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },
    /// No sample matched the metric name and label constraints.
    #[error("no `{metric}` sample matching {selector}")]
    MissingMetric { metric: String, selector: String },
    /// The matching sample's value is not a non-negative integer.
    #[error("`{metric}` has non-integer value `{value}`")]
    InvalidValue { metric: String, value: String },
}

/// Failure fetching a single peer's metrics.
#[derive(Debug, Clone, Error)]
pub enum MetricsError {
    /// Connection refused, DNS failure, timeout and similar.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },
    /// The response body exceeded the configured size limit.
    #[error("{url} returned more than {limit} bytes")]
    BodyTooLarge { url: String, limit: usize },
    /// The endpoint answered with something other than `200 OK`.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    /// The body was received but is not a usable metrics document.
    #[error("invalid metrics from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },
}

impl MetricsError {
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source: Arc::new(source),
        }
    }

    /// The request did not complete within `request_timeout`.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }

    /// The peer could not be connected to.
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_connect())
    }
}

/// Failure resolving the peers of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("unknown organization `{0}`")]
    UnknownOrganization(String),
    #[error("peer `{peer}` of organization `{org}` has no metrics URL")]
    MissingMetricsUrl { org: String, peer: String },
}

/// Failure loading or validating configuration and descriptor files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Coarse classification of a unit failure, used in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Serialize,
    WorkerLaunch,
    Topology,
    Transport,
    MetricsParse,
    ConsistencyMismatch,
    Aborted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Serialize => "serialize",
            Self::WorkerLaunch => "worker_launch",
            Self::Topology => "topology",
            Self::Transport => "transport",
            Self::MetricsParse => "metrics_parse",
            Self::ConsistencyMismatch => "consistency_mismatch",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Terminal failure of one execution unit.
#[derive(Debug, Clone, Error)]
pub enum UnitError {
    /// The descriptor could not be serialized for the worker.
    #[error("failed to serialize descriptor: {0}")]
    Serialize(String),
    #[error("worker failed: {0}")]
    Worker(#[from] WorkerError),
    #[error("topology lookup failed: {0}")]
    Topology(#[from] TopologyError),
    #[error("metrics from peer `{peer}`: {source}")]
    Metrics {
        peer: String,
        #[source]
        source: MetricsError,
    },
    /// Peers disagree on ledger height or transaction count.
    #[error("{} peer(s) out of sync on channel `{channel}`", .mismatches.len())]
    Mismatch {
        channel: String,
        mismatches: Vec<Mismatch>,
    },
    /// The unit's task panicked or was cancelled by the runtime.
    #[error("unit task aborted: {0}")]
    Aborted(String),
}

impl UnitError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Serialize(_) => ErrorKind::Serialize,
            Self::Worker(_) => ErrorKind::WorkerLaunch,
            Self::Topology(_) => ErrorKind::Topology,
            Self::Metrics {
                source: MetricsError::Parse { .. },
                ..
            } => ErrorKind::MetricsParse,
            Self::Metrics { .. } => ErrorKind::Transport,
            Self::Mismatch { .. } => ErrorKind::ConsistencyMismatch,
            Self::Aborted(_) => ErrorKind::Aborted,
        }
    }
}
