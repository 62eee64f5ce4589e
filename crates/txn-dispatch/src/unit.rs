//! Execution of a single workload descriptor.
//!
//! A unit runs in strict sequence:
//!
//! 1. serialize the descriptor and run the worker to completion
//! 2. resolve every peer of the unit's channel across its organizations
//! 3. fetch metrics from all of those peers concurrently
//! 4. compare the snapshots
//!
//! Any step failing ends the unit with a [`UnitError`]; nothing is retried.

use crate::config::DispatchConfig;
use crate::consistency::{ChannelMetricSet, ConsistencyReport, check_consistency};
use crate::descriptor::WorkloadDescriptor;
use crate::error::{ConfigError, UnitError};
use crate::metrics::MetricsClient;
use crate::topology::{PeerEndpoint, StaticTopology, TopologyProvider};
use crate::worker::{ProcessWorker, Worker, WorkerInvocation};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a successful unit observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub consistency: ConsistencyReport,
}

impl UnitReport {
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.consistency.channel
    }

    /// Peer every other snapshot was compared against.
    #[must_use]
    pub fn reference_peer(&self) -> Option<&str> {
        self.consistency.reference_peer.as_deref()
    }

    #[must_use]
    pub fn peers_checked(&self) -> usize {
        self.consistency.peers_checked
    }

    /// No peers were resolved, so nothing was actually compared.
    #[must_use]
    pub fn no_peers(&self) -> bool {
        self.consistency.has_no_peers()
    }
}

/// Runs descriptors through the worker and verifies peer agreement.
pub struct ExecutionUnit {
    worker: Arc<dyn Worker>,
    topology: Arc<dyn TopologyProvider>,
    metrics: MetricsClient,
}

impl ExecutionUnit {
    #[must_use]
    pub fn new(
        worker: Arc<dyn Worker>,
        topology: Arc<dyn TopologyProvider>,
        metrics: MetricsClient,
    ) -> Self {
        Self {
            worker,
            topology,
            metrics,
        }
    }

    /// Process worker, static topology and metrics client from `config`.
    pub fn from_config(config: &DispatchConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Arc::new(ProcessWorker::from_config(&config.worker)),
            Arc::new(StaticTopology::new(config.topology.clone())),
            MetricsClient::new(&config.metrics)?,
        ))
    }

    /// Run the worker for `descriptor`, then check peer consistency.
    pub async fn execute(
        &self,
        index: usize,
        descriptor: &WorkloadDescriptor,
    ) -> Result<UnitReport, UnitError> {
        let descriptor_json = descriptor.to_worker_json().map_err(|e| {
            error!(index, channel = %descriptor.channel, "Failed to serialize descriptor: {}", e);
            UnitError::Serialize(e.to_string())
        })?;

        let invocation = WorkerInvocation {
            index,
            channel: descriptor.channel.clone(),
            descriptor_json,
            started_at: Utc::now(),
        };

        if let Err(e) = self.worker.run(&invocation).await {
            error!(index, channel = %descriptor.channel, "Worker failed: {}", e);
            return Err(e.into());
        }
        info!(index, channel = %descriptor.channel, "Worker completed");

        let consistency = self.verify(descriptor).await?;
        Ok(UnitReport { consistency })
    }

    /// Fetch metrics for the descriptor's channel and compare peers,
    /// without running the worker.
    pub async fn verify(
        &self,
        descriptor: &WorkloadDescriptor,
    ) -> Result<ConsistencyReport, UnitError> {
        let channel = &descriptor.channel;
        let set = self.collect_metrics(descriptor).await?;
        let report = check_consistency(&set);

        if report.has_no_peers() {
            warn!(
                channel = %channel,
                organizations = ?descriptor.organizations,
                "No peers resolved for channel; consistency check is vacuous"
            );
        }

        if !report.is_consistent() {
            for mismatch in &report.mismatches {
                error!(
                    channel = %channel,
                    peer = %mismatch.peer,
                    reference_peer = %mismatch.reference_peer,
                    expected_height = mismatch.expected.blockchain_height,
                    observed_height = mismatch.observed.blockchain_height,
                    expected_transactions = mismatch.expected.transaction_count,
                    observed_transactions = mismatch.observed.transaction_count,
                    "Peer is not in sync"
                );
            }
            return Err(UnitError::Mismatch {
                channel: channel.clone(),
                mismatches: report.mismatches,
            });
        }

        debug!(channel = %channel, peers = report.peers_checked, "Peers in sync");
        Ok(report)
    }

    /// Snapshots from every peer of the descriptor's channel.
    ///
    /// All fetches run to completion before the first failure, in peer
    /// order, is returned.
    pub async fn collect_metrics(
        &self,
        descriptor: &WorkloadDescriptor,
    ) -> Result<ChannelMetricSet, UnitError> {
        let peers = self.resolve_peers(descriptor).await?;
        let channel = descriptor.channel.as_str();
        let chaincode_id = descriptor.chaincode_id.as_str();

        let fetches = peers.iter().map(|peer| async move {
            let result = self.metrics.fetch(peer, channel, chaincode_id).await;
            (peer, result)
        });

        let mut set = ChannelMetricSet::new(channel);
        let mut first_error = None;
        for (peer, result) in join_all(fetches).await {
            match result {
                Ok(snapshot) => {
                    set.insert(snapshot);
                }
                Err(e) => {
                    error!(channel = %channel, peer = %peer.name, "Failed fetching metrics: {}", e);
                    first_error.get_or_insert(UnitError::Metrics {
                        peer: peer.name.clone(),
                        source: e,
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(set),
        }
    }

    /// Union of the channel's peers across the descriptor's organizations,
    /// each peer listed once.
    async fn resolve_peers(
        &self,
        descriptor: &WorkloadDescriptor,
    ) -> Result<Vec<PeerEndpoint>, UnitError> {
        let mut seen = BTreeSet::new();
        let mut peers = Vec::new();

        for org in &descriptor.organizations {
            let org_peers = self
                .topology
                .channel_peers(&descriptor.connection_profile, org, &descriptor.channel)
                .await
                .inspect_err(|e| {
                    error!(channel = %descriptor.channel, org = %org, "Topology lookup failed: {}", e);
                })?;
            for peer in org_peers {
                if seen.insert(peer.name.clone()) {
                    peers.push(peer);
                }
            }
        }

        Ok(peers)
    }
}
