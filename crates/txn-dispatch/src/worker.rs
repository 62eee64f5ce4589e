//! External workload worker.
//!
//! The worker is an opaque program that drives transactions against the
//! ledger. It is invoked as
//!
//! ```text
//! <program> <entry> <unit-index> <descriptor-json> <start-timestamp>
//! ```
//!
//! and exit status 0 means the workload completed.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// Bytes of worker stderr kept for error messages.
const STDERR_TAIL_BYTES: usize = 512;

/// Everything a worker needs to run one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    pub index: usize,
    pub channel: String,
    /// Serialized descriptor.
    pub descriptor_json: String,
    pub started_at: DateTime<Utc>,
}

impl WorkerInvocation {
    /// Arguments following the worker entry path.
    #[must_use]
    pub fn args(&self) -> [String; 3] {
        [
            self.index.to_string(),
            self.descriptor_json.clone(),
            self.started_at.to_rfc3339(),
        ]
    }
}

/// Runs a workload to completion.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, invocation: &WorkerInvocation) -> Result<(), WorkerError>;
}

/// Worker backed by a child process.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: String,
    entry: PathBuf,
    timeout: Duration,
}

impl ProcessWorker {
    #[must_use]
    pub fn new(program: impl Into<String>, entry: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            entry: entry.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.program.clone(), config.entry.clone(), config.timeout)
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn run(&self, invocation: &WorkerInvocation) -> Result<(), WorkerError> {
        debug!(
            index = invocation.index,
            channel = %invocation.channel,
            program = %self.program,
            "Launching worker"
        );

        let child = tokio::process::Command::new(&self.program)
            .arg(&self.entry)
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| WorkerError::Timeout(self.timeout))?
            .map_err(|e| WorkerError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(WorkerError::Exit {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            })
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
