//! Cross-peer ledger consistency checking.
//!
//! After a unit's worker finishes, every peer in the channel is asked for
//! its ledger height and valid-transaction count. Peers that committed the
//! same blocks must report identical numbers; any divergence is collected
//! into a [`ConsistencyReport`].
//!
//! The reference peer is the lexicographically smallest peer name, so the
//! "expected" side of a mismatch is stable from run to run.
//!
//! Metrics are sampled once, after the worker exits. A peer that is still
//! catching up through gossip will show up as a mismatch even though it
//! would converge moments later.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The two counters compared across peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerState {
    pub blockchain_height: u64,
    pub transaction_count: u64,
}

impl std::fmt::Display for LedgerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "height={} transactions={}",
            self.blockchain_height, self.transaction_count
        )
    }
}

/// Metrics observed on one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetricSnapshot {
    pub peer: String,
    pub blockchain_height: u64,
    pub transaction_count: u64,
}

impl PeerMetricSnapshot {
    #[must_use]
    pub fn new(peer: impl Into<String>, blockchain_height: u64, transaction_count: u64) -> Self {
        Self {
            peer: peer.into(),
            blockchain_height,
            transaction_count,
        }
    }

    #[must_use]
    pub fn state(&self) -> LedgerState {
        LedgerState {
            blockchain_height: self.blockchain_height,
            transaction_count: self.transaction_count,
        }
    }
}

/// Snapshots for every peer of one channel, keyed by peer name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMetricSet {
    channel: String,
    peers: BTreeMap<String, PeerMetricSnapshot>,
}

impl ChannelMetricSet {
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            peers: BTreeMap::new(),
        }
    }

    /// Insert a snapshot, replacing and returning any previous one for the
    /// same peer.
    pub fn insert(&mut self, snapshot: PeerMetricSnapshot) -> Option<PeerMetricSnapshot> {
        self.peers.insert(snapshot.peer.clone(), snapshot)
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn get(&self, peer: &str) -> Option<&PeerMetricSnapshot> {
        self.peers.get(peer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshots in peer-name order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerMetricSnapshot> {
        self.peers.values()
    }
}

/// A peer whose counters differ from the reference peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub peer: String,
    pub reference_peer: String,
    pub expected: LedgerState,
    pub observed: LedgerState,
}

impl Mismatch {
    #[must_use]
    pub fn height_differs(&self) -> bool {
        self.expected.blockchain_height != self.observed.blockchain_height
    }

    #[must_use]
    pub fn count_differs(&self) -> bool {
        self.expected.transaction_count != self.observed.transaction_count
    }
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "peer {} reports {} but {} reports {}",
            self.peer, self.observed, self.reference_peer, self.expected
        )
    }
}

/// Outcome of comparing all peers of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub channel: String,
    /// `None` only when the set was empty.
    pub reference_peer: Option<String>,
    pub reference: Option<LedgerState>,
    pub peers_checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ConsistencyReport {
    /// True when every peer agreed. An empty set is vacuously consistent.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// No peers were resolved for the channel, which usually means the
    /// topology is misconfigured.
    #[must_use]
    pub fn has_no_peers(&self) -> bool {
        self.peers_checked == 0
    }
}

/// Compare every peer in `set` against the reference peer.
///
/// Pure function of its input: calling it twice on the same set yields the
/// same report.
#[must_use]
pub fn check_consistency(set: &ChannelMetricSet) -> ConsistencyReport {
    let mut peers = set.iter();
    let Some(reference) = peers.next() else {
        return ConsistencyReport {
            channel: set.channel().to_string(),
            reference_peer: None,
            reference: None,
            peers_checked: 0,
            mismatches: Vec::new(),
        };
    };

    let expected = reference.state();
    let mismatches = peers
        .filter(|snapshot| snapshot.state() != expected)
        .map(|snapshot| Mismatch {
            peer: snapshot.peer.clone(),
            reference_peer: reference.peer.clone(),
            expected,
            observed: snapshot.state(),
        })
        .collect();

    ConsistencyReport {
        channel: set.channel().to_string(),
        reference_peer: Some(reference.peer.clone()),
        reference: Some(expected),
        peers_checked: set.len(),
        mismatches,
    }
}
