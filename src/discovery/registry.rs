//! Discovery Registry
//!
//! Source of truth for cluster membership. One entry per node address;
//! a re-join overwrites the entry and starts a new epoch.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::types::NodeAddress;

/// A registered node
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Node address
    pub address: NodeAddress,
    /// Consecutive pushes without an acknowledgment
    pub missed_heartbeats: u32,
    /// When the node (re-)joined
    pub joined_at: DateTime<Utc>,
    /// Last acknowledged push
    pub last_ack: Option<Instant>,
    /// Join generation
    pub epoch: u64,
}

/// Outcome of delivering one push to one node
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub address: NodeAddress,
    /// Epoch the push was sent against
    pub epoch: u64,
    pub acked: bool,
}

/// Summary of a broadcast round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub acked: usize,
    pub missed: usize,
    pub evicted: Vec<NodeAddress>,
}

struct RegistryInner {
    entries: BTreeMap<NodeAddress, RegistryEntry>,
    next_epoch: u64,
}

/// Registered nodes, guarded by a single lock
pub struct DiscoveryRegistry {
    inner: RwLock<RegistryInner>,
    /// Misses at which an entry is evicted
    max_missed: u32,
}

impl DiscoveryRegistry {
    /// Create an empty registry
    pub fn new(max_missed: u32) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                entries: BTreeMap::new(),
                next_epoch: 1,
            }),
            max_missed: max_missed.max(1),
        }
    }

    /// Register or re-register `address`; returns the new epoch
    pub async fn upsert(&self, address: NodeAddress) -> u64 {
        let mut inner = self.inner.write().await;
        let epoch = inner.next_epoch;
        inner.next_epoch += 1;

        let rejoined = inner
            .entries
            .insert(
                address.clone(),
                RegistryEntry {
                    address: address.clone(),
                    missed_heartbeats: 0,
                    joined_at: Utc::now(),
                    last_ack: None,
                    epoch,
                },
            )
            .is_some();

        if rejoined {
            tracing::info!("Node {} re-joined (epoch {})", address, epoch);
        } else {
            tracing::info!("Node {} joined (epoch {})", address, epoch);
        }
        epoch
    }

    /// Every registered address except `excluded`
    pub async fn members_excluding(&self, excluded: &NodeAddress) -> Vec<NodeAddress> {
        let inner = self.inner.read().await;
        inner
            .entries
            .keys()
            .filter(|addr| *addr != excluded)
            .cloned()
            .collect()
    }

    /// All registered addresses, sorted
    pub async fn addresses(&self) -> Vec<NodeAddress> {
        self.inner.read().await.entries.keys().cloned().collect()
    }

    /// Copy of every entry, sorted by address
    pub async fn snapshot(&self) -> Vec<RegistryEntry> {
        self.inner.read().await.entries.values().cloned().collect()
    }

    /// Whether `address` is registered
    pub async fn contains(&self, address: &NodeAddress) -> bool {
        self.inner.read().await.entries.contains_key(address)
    }

    /// Number of registered nodes
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether no node is registered
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Record a broadcast round. Outcomes for an entry that has since
    /// re-joined (different epoch) or been removed are ignored.
    pub async fn apply_round(&self, outcomes: &[PushOutcome]) -> RoundReport {
        let mut report = RoundReport::default();
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        for outcome in outcomes {
            let Some(entry) = inner.entries.get_mut(&outcome.address) else {
                continue;
            };
            if entry.epoch != outcome.epoch {
                continue;
            }

            if outcome.acked {
                entry.missed_heartbeats = 0;
                entry.last_ack = Some(now);
                report.acked += 1;
                continue;
            }

            entry.missed_heartbeats += 1;
            report.missed += 1;
            tracing::debug!(
                "Node {} missed heartbeat ({}/{})",
                entry.address,
                entry.missed_heartbeats,
                self.max_missed
            );

            if entry.missed_heartbeats >= self.max_missed {
                let member_for = Utc::now().signed_duration_since(entry.joined_at);
                let last_ack = entry.last_ack.map(|at| now.duration_since(at));
                inner.entries.remove(&outcome.address);
                tracing::warn!(
                    "Evicting node {} after {} missed heartbeats (member for {}s, last ack {:?} ago)",
                    outcome.address,
                    self.max_missed,
                    member_for.num_seconds(),
                    last_ack
                );
                report.evicted.push(outcome.address.clone());
            }
        }

        report
    }
}
