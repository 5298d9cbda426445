//! Peer Directory
//!
//! The set of peers a node currently knows about. It is only ever
//! replaced wholesale from a membership snapshot, never merged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::types::NodeAddress;

/// Last-known liveness of a peer
#[derive(Debug, Clone, Copy)]
pub struct PeerLiveness {
    /// When the latest snapshot listing this peer was applied
    pub last_contact: DateTime<Utc>,
}

/// Known peers of the local node (never contains the local node)
pub struct PeerDirectory {
    /// This node's address
    local: NodeAddress,
    /// Peers by address
    peers: RwLock<HashMap<NodeAddress, PeerLiveness>>,
}

impl PeerDirectory {
    /// Create an empty directory for `local`
    pub fn new(local: NodeAddress) -> Self {
        Self {
            local,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// This node's address
    pub fn local(&self) -> &NodeAddress {
        &self.local
    }

    /// Replace every entry with `snapshot`, dropping the local address
    pub(crate) async fn replace(&self, snapshot: &[NodeAddress]) -> usize {
        let now = Utc::now();
        let next: HashMap<NodeAddress, PeerLiveness> = snapshot
            .iter()
            .filter(|addr| *addr != &self.local)
            .map(|addr| {
                (
                    addr.clone(),
                    PeerLiveness { last_contact: now },
                )
            })
            .collect();

        let count = next.len();
        *self.peers.write().await = next;
        count
    }

    /// All peer addresses, sorted
    pub async fn addresses(&self) -> Vec<NodeAddress> {
        let peers = self.peers.read().await;
        let mut addresses: Vec<NodeAddress> = peers.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Peers with their liveness metadata, sorted by address
    pub async fn entries(&self) -> Vec<(NodeAddress, PeerLiveness)> {
        let peers = self.peers.read().await;
        let mut entries: Vec<_> = peers.iter().map(|(a, l)| (a.clone(), *l)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Whether `address` is a known peer
    pub async fn contains(&self, address: &NodeAddress) -> bool {
        self.peers.read().await.contains_key(address)
    }

    /// Number of known peers
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peers are known
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
