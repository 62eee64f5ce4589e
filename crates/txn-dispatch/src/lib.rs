//! Concurrent transaction dispatch with cross-peer ledger verification.
//!
//! Given a batch of workload descriptors, this crate launches one external
//! worker per descriptor, all at once, and waits for every one of them.
//! When a worker finishes, the peers of its channel are scraped for their
//! ledger height and valid-transaction count, and any peer that disagrees
//! with the others is reported.
//!
//! # Architecture
//!
//! ```text
//!  descriptors ──► Dispatcher ──┬─► ExecutionUnit #0 ─► worker ─► metrics ─► check
//!                               ├─► ExecutionUnit #1 ─► worker ─► metrics ─► check
//!                               └─► ExecutionUnit #N ─► ...
//!                                         │
//!                        (barrier) ◄──────┘  one DispatchResult per unit
//! ```
//!
//! - [`Dispatcher`] spawns one task per descriptor and collects every
//!   result, failed or not, in submission order.
//! - [`ExecutionUnit`] runs the worker, then fetches metrics from all peers
//!   of the channel and compares them.
//! - [`MetricsClient`] fetches `/metrics` and parses the exposition format.
//! - [`check_consistency`] compares per-peer snapshots against a
//!   deterministic reference peer.
//!
//! # Usage
//!
//! ```rust,ignore
//! use txn_dispatch::{DispatchConfig, Dispatcher, ExecutionUnit, load_descriptors};
//!
//! let config = DispatchConfig::load("dispatch.yaml".as_ref())?;
//! let dispatcher = Dispatcher::new(ExecutionUnit::from_config(&config)?);
//! let outcome = dispatcher.run(load_descriptors("batch.json".as_ref())?).await;
//!
//! for failed in outcome.failed() {
//!     eprintln!("unit {} on {} failed", failed.index, failed.channel);
//! }
//! ```

pub mod config;
pub mod consistency;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod topology;
pub mod unit;
pub mod worker;

pub use config::{DispatchConfig, MetricsConfig, WorkerConfig};
pub use consistency::{
    ChannelMetricSet, ConsistencyReport, LedgerState, Mismatch, PeerMetricSnapshot,
    check_consistency,
};
pub use descriptor::{WorkloadDescriptor, load_descriptors};
pub use dispatch::{
    BatchOutcome, BatchReport, BatchSummary, DispatchResult, Dispatcher, UnitRecord,
};
pub use error::{
    ConfigError, ErrorKind, MetricsError, ParseError, TopologyError, UnitError, WorkerError,
};
pub use metrics::{MetricsClient, MetricsDocument};
pub use topology::{PeerEndpoint, StaticTopology, TopologyConfig, TopologyProvider};
pub use unit::{ExecutionUnit, UnitReport};
pub use worker::{ProcessWorker, Worker, WorkerInvocation};
