//! FileMesh - Peer-to-peer file replication
//!
//! Replicates files across a flat set of autonomous nodes. Each read asks
//! every known peer how fresh its copy is and pulls the newest one before
//! serving it; a separate discovery service tells nodes about each other
//! and evicts the ones that stop answering.
//!
//! # Architecture
//!
//! There is no leader and no consensus. Conflicts are settled by
//! modification time alone: the latest timestamp wins and ties keep the
//! local copy.
//!
//! # Features
//!
//! - Length-prefixed, checksummed peer protocol over TCP
//! - Concurrent freshness rounds with a shared deadline
//! - Discovery service with heartbeat-based eviction
//! - Self-healing membership with jittered re-join backoff
//! - Atomic local writes
//! - HTTP API for reads, uploads and status

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod membership;
pub mod network;
pub mod node;
pub mod replication;
pub mod storage;
pub mod types;

pub use config::FileMeshConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::FileMeshConfig;
    pub use crate::discovery::DiscoveryService;
    pub use crate::error::{Error, Result};
    pub use crate::membership::{MembershipClient, MembershipState, PeerDirectory};
    pub use crate::network::Message;
    pub use crate::node::{DiscoveryNode, FileNode};
    pub use crate::replication::ReplicationCoordinator;
    pub use crate::storage::{DiskStore, FileStore};
    pub use crate::types::{FileTimestampClaim, NodeAddress, Timestamp};
}
