//! Concurrent fan-out of execution units.
//!
//! Every descriptor gets its own tokio task, launched immediately and
//! without any concurrency cap. Each task returns its own typed result
//! through its join handle, so there is no shared mutable state between
//! units. [`Dispatcher::run`] only returns once every task has reached a
//! terminal state.

use crate::descriptor::WorkloadDescriptor;
use crate::error::{ErrorKind, UnitError};
use crate::unit::{ExecutionUnit, UnitReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one unit.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// Position of the descriptor in the submitted batch.
    pub index: usize,
    pub channel: String,
    pub outcome: Result<UnitReport, UnitError>,
}

impl DispatchResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&UnitError> {
        self.outcome.as_ref().err()
    }
}

/// Every unit's outcome for one batch, ordered by index.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<DispatchResult>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> impl Iterator<Item = &DispatchResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DispatchResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(DispatchResult::is_success)
    }

    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        let failed: Vec<_> = self.failed().collect();
        BatchSummary {
            run_id: self.run_id,
            total: self.results.len(),
            succeeded: self.results.len() - failed.len(),
            failed: failed.len(),
            failed_indices: failed.iter().map(|r| r.index).collect(),
            duration_ms: (self.finished_at - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        }
    }

    /// Serializable view of the batch for reports.
    #[must_use]
    pub fn to_report(&self) -> BatchReport {
        BatchReport {
            summary: self.summary(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            units: self.results.iter().map(UnitRecord::from).collect(),
        }
    }
}

/// Counts for a finished batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_indices: Vec<usize>,
    pub duration_ms: u64,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run {}: {}/{} units succeeded in {}ms",
            self.run_id, self.succeeded, self.total, self.duration_ms
        )?;
        if !self.failed_indices.is_empty() {
            write!(f, ", failed indices {:?}", self.failed_indices)?;
        }
        Ok(())
    }
}

/// One unit in a [`BatchReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub index: usize,
    pub channel: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<UnitReport>,
}

impl From<&DispatchResult> for UnitRecord {
    fn from(result: &DispatchResult) -> Self {
        match &result.outcome {
            Ok(report) => Self {
                index: result.index,
                channel: result.channel.clone(),
                success: true,
                error_kind: None,
                error: None,
                report: Some(report.clone()),
            },
            Err(e) => Self {
                index: result.index,
                channel: result.channel.clone(),
                success: false,
                error_kind: Some(e.kind()),
                error: Some(e.to_string()),
                report: None,
            },
        }
    }
}

/// Serializable batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitRecord>,
}

/// Fans a batch of descriptors out over concurrent execution units.
#[derive(Clone)]
pub struct Dispatcher {
    unit: Arc<ExecutionUnit>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(unit: ExecutionUnit) -> Self {
        Self {
            unit: Arc::new(unit),
        }
    }

    /// Run every descriptor concurrently and wait for all of them.
    ///
    /// A failing unit never cancels its siblings. The returned outcome
    /// holds exactly one result per descriptor, in submission order.
    pub async fn run(&self, descriptors: Vec<WorkloadDescriptor>) -> BatchOutcome {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, units = descriptors.len(), "Dispatching batch");

        let handles: Vec<_> = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, descriptor)| {
                let unit = Arc::clone(&self.unit);
                let channel = descriptor.channel.clone();
                let handle =
                    tokio::spawn(async move { unit.execute(index, &descriptor).await });
                (index, channel, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (index, channel, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(UnitError::Aborted(e.to_string())),
            };

            // Units log their own failures; only an aborted task is new here.
            match &outcome {
                Err(e @ UnitError::Aborted(_)) => {
                    error!(%run_id, index, channel = %channel, "Unit task aborted: {}", e);
                }
                Err(e) => {
                    debug!(%run_id, index, channel = %channel, kind = %e.kind(), "Unit failed");
                }
                Ok(_) => {}
            }
            results.push(DispatchResult {
                index,
                channel,
                outcome,
            });
        }

        let outcome = BatchOutcome {
            run_id,
            started_at,
            finished_at: Utc::now(),
            results,
        };

        let summary = outcome.summary();
        if outcome.all_succeeded() {
            info!("{}", summary);
        } else {
            warn!("{}", summary);
        }
        outcome
    }
}
