//! Channel topology lookup.
//!
//! Execution units need to know which peers belong to their channel and
//! where each peer serves metrics. That knowledge normally lives in an
//! organization's connection profile; here it sits behind the
//! [`TopologyProvider`] trait so the dispatcher does not care where it
//! comes from.

use crate::error::TopologyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A peer and the base URL of its operations endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub name: String,
    pub metrics_url: String,
}

impl PeerEndpoint {
    #[must_use]
    pub fn new(name: impl Into<String>, metrics_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics_url: metrics_url.into(),
        }
    }
}

/// Resolves the peers an organization runs for a channel.
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    /// Peers of `org` joined to `channel`.
    ///
    /// An organization with no peers on the channel yields an empty list,
    /// which callers flag as a configuration anomaly.
    async fn channel_peers(
        &self,
        connection_profile: &Path,
        org: &str,
        channel: &str,
    ) -> Result<Vec<PeerEndpoint>, TopologyError>;
}

/// Per-peer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub metrics_url: String,
}

/// One organization's peers and channel membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationConfig {
    #[serde(default)]
    pub peers: BTreeMap<String, PeerConfig>,
    /// Channel name to the names of this organization's peers on it.
    #[serde(default)]
    pub channels: BTreeMap<String, Vec<String>>,
}

/// Topology section of the dispatch configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub organizations: BTreeMap<String, OrganizationConfig>,
}

impl TopologyConfig {
    /// Every channel peer must have a metrics URL.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for (org, config) in &self.organizations {
            for peer in config.channels.values().flatten() {
                let has_url = config
                    .peers
                    .get(peer)
                    .is_some_and(|p| !p.metrics_url.trim().is_empty());
                if !has_url {
                    return Err(TopologyError::MissingMetricsUrl {
                        org: org.clone(),
                        peer: peer.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Topology held in memory, keyed by organization.
///
/// The connection profile path is ignored; the same organization always
/// resolves to the same peers.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    config: TopologyConfig,
}

impl StaticTopology {
    #[must_use]
    pub fn new(config: TopologyConfig) -> Self {
        Self { config }
    }

    /// Add a peer to `org` and join it to `channel`.
    pub fn with_peer(mut self, org: &str, channel: &str, peer: PeerEndpoint) -> Self {
        let org_config = self
            .config
            .organizations
            .entry(org.to_string())
            .or_default();
        org_config
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(peer.name.clone());
        org_config.peers.insert(
            peer.name,
            PeerConfig {
                metrics_url: peer.metrics_url,
            },
        );
        self
    }
}

#[async_trait]
impl TopologyProvider for StaticTopology {
    async fn channel_peers(
        &self,
        _connection_profile: &Path,
        org: &str,
        channel: &str,
    ) -> Result<Vec<PeerEndpoint>, TopologyError> {
        let org_config = self
            .config
            .organizations
            .get(org)
            .ok_or_else(|| TopologyError::UnknownOrganization(org.to_string()))?;

        let Some(peer_names) = org_config.channels.get(channel) else {
            return Ok(Vec::new());
        };

        peer_names
            .iter()
            .map(|name| {
                org_config
                    .peers
                    .get(name)
                    .map(|p| PeerEndpoint::new(name.clone(), p.metrics_url.clone()))
                    .ok_or_else(|| TopologyError::MissingMetricsUrl {
                        org: org.to_string(),
                        peer: name.clone(),
                    })
            })
            .collect()
    }
}
